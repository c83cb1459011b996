use std::time::Duration;

/// Parse a duration such as `1h30m`, `10m`, `45s`, `500ms` or `30` (seconds)
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("invalid duration {:?}: expected a number", input));
        }
        let amount: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration {:?}: number too large", input))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "h" => Duration::from_secs(amount * 3600),
            "m" => Duration::from_secs(amount * 60),
            "s" => Duration::from_secs(amount),
            "ms" => Duration::from_millis(amount),
            "" => return Err(format!("invalid duration {:?}: missing unit", input)),
            other => return Err(format!("invalid duration {:?}: unknown unit {:?}", input, other)),
        };
        total += unit;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("10m", Duration::from_secs(600))]
    #[case("1h30m", Duration::from_secs(5400))]
    #[case("45s", Duration::from_secs(45))]
    #[case("1m500ms", Duration::from_millis(60_500))]
    #[case("30", Duration::from_secs(30))]
    #[case("0s", Duration::ZERO)]
    fn parse_duration_accepts_valid_input(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(input), Ok(expected));
    }

    #[rstest]
    #[case("")]
    #[case("ten minutes")]
    #[case("10x")]
    #[case("m10")]
    fn parse_duration_rejects_invalid_input(#[case] input: &str) {
        assert!(parse_duration(input).is_err());
    }
}
