// Shared prompt fragments and prompt-building utilities.
// Each service that needs LLM calls defines its own prompts.rs alongside it.

/// Appended to system prompts that must produce a JSON object.
pub const JSON_ONLY_INSTRUCTION: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Appended to system prompts that must produce bare HTML markup.
pub const HTML_ONLY_INSTRUCTION: &str = "Respond with an HTML fragment only, using \
    <h2>, <h3>, <p>, <ul>, <ol>, <li>, <strong> and <em> tags. \
    Do NOT include <html>, <head> or <body> tags. \
    Do NOT use markdown or code fences.";

/// Substitutes `{name}` placeholders in one left-to-right pass.
///
/// Substituted values are never rescanned, so user text that happens to contain
/// `{extracted_text}` or similar is inserted literally. Unknown braces are kept.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let extra: usize = values.iter().map(|(_, v)| v.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];

        let matched = values.iter().find_map(|(name, value)| {
            let key_len = name.len() + 2;
            let is_match = tail.len() >= key_len
                && tail[1..].starts_with(name)
                && tail[1 + name.len()..].starts_with('}');
            is_match.then_some((*value, key_len))
        });

        match matched {
            Some((value, key_len)) => {
                out.push_str(value);
                rest = &tail[key_len..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_template_substitutes_all_occurrences() {
        let out = fill_template("{a} and {b} and {a}", &[("a", "x"), ("b", "y")]);
        assert_eq!(out, "x and y and x");
    }

    #[test]
    fn test_fill_template_keeps_unknown_and_json_braces() {
        let out = fill_template(r#"{"title": "{a}"} {missing}"#, &[("a", "Intro")]);
        assert_eq!(out, r#"{"title": "Intro"} {missing}"#);
    }

    #[test]
    fn test_fill_template_does_not_rescan_values() {
        let out = fill_template(
            "Company: {description}\nDoc: {extracted_text}",
            &[
                ("description", "We love {extracted_text}"),
                ("extracted_text", "RFP body"),
            ],
        );
        assert_eq!(out, "Company: We love {extracted_text}\nDoc: RFP body");
    }

    #[test]
    fn test_fill_template_handles_trailing_brace_and_multibyte() {
        let out = fill_template("é {a} ü {", &[("a", "ø")]);
        assert_eq!(out, "é ø ü {");
    }
}
