//! `{{ name }}` placeholder rendering for commands, webhooks and notifications

use std::borrow::Cow;

/// Values available to templates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars<'a> {
    pub service_id: &'a str,
    pub version: &'a str,
    pub web_url: &'a str,
}

impl<'a> TemplateVars<'a> {
    pub fn new(service_id: &'a str, version: &'a str) -> Self {
        Self {
            service_id,
            version,
            web_url: "",
        }
    }

    pub fn with_web_url(mut self, web_url: &'a str) -> Self {
        self.web_url = web_url;
        self
    }

    fn lookup(&self, name: &str) -> Option<&'a str> {
        match name {
            "service_id" => Some(self.service_id),
            "version" => Some(self.version),
            "web_url" => Some(self.web_url),
            _ => None,
        }
    }
}

/// Replace every known `{{ name }}` (whitespace inside the braces optional).
///
/// Unknown placeholders are left untouched.
pub fn render<'t>(template: &'t str, vars: &TemplateVars<'_>) -> Cow<'t, str> {
    if !template.contains("{{") {
        return Cow::Borrowed(template);
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start..].find("}}") else {
            break;
        };
        let name = rest[start + 2..start + len].trim();
        out.push_str(&rest[..start]);
        match vars.lookup(name) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + len + 2]),
        }
        rest = &rest[start + len + 2..];
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Render a `{{ version }}` placeholder only
pub fn render_version<'t>(template: &'t str, version: &str) -> Cow<'t, str> {
    render(template, &TemplateVars::new("", version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("plain", "plain")]
    #[case("v{{ version }}", "v1.2.3")]
    #[case("{{version}}-{{ service_id }}", "1.2.3-argus")]
    #[case("{{ unknown }} {{version}}", "{{ unknown }} 1.2.3")]
    #[case("{{ version", "{{ version")]
    #[case("{{ web_url }}/releases", "https://example.com/releases")]
    fn render_substitutes_known_placeholders(#[case] template: &str, #[case] expected: &str) {
        let vars = TemplateVars::new("argus", "1.2.3").with_web_url("https://example.com");
        assert_eq!(render(template, &vars), expected);
    }
}
