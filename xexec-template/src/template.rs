use crate::grammar::{Rule, TemplateParser};
use pest::Parser;
use xexec_core::{Result, XexecError};

/// Marker replaced by the results file path in command arguments
pub const RESULT_FILE_PLACEHOLDER: &str = "<result_file>";

/// A piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    /// `raw` is the reference exactly as written, kept for unknown variables
    Variable { name: &'a str, raw: &'a str },
    ResultFile,
}

impl<'a> Segment<'a> {
    fn raw(&self) -> &'a str {
        match self {
            Segment::Literal(text) => *text,
            Segment::Variable { raw, .. } => *raw,
            Segment::ResultFile => RESULT_FILE_PLACEHOLDER,
        }
    }
}

/// Split a template string into literal text, variable references and placeholders
pub fn parse_template(input: &str) -> Result<Vec<Segment<'_>>> {
    let mut pairs = TemplateParser::parse(Rule::template, input)
        .map_err(|e| XexecError::TemplateError(format!("Parse error: {}", e)))?;

    let template = pairs.next().ok_or_else(|| {
        XexecError::TemplateError("Empty template parse".to_string())
    })?;

    let mut segments = Vec::new();
    for pair in template.into_inner() {
        match pair.as_rule() {
            Rule::placeholder => segments.push(Segment::ResultFile),
            Rule::braced_var | Rule::bare_var => {
                let raw = pair.as_str();
                let name = pair
                    .into_inner()
                    .next()
                    .map(|p| p.as_str())
                    .ok_or_else(|| {
                        XexecError::TemplateError(format!("Missing variable name in {}", raw))
                    })?;
                segments.push(Segment::Variable { name, raw });
            }
            Rule::literal | Rule::dollar => segments.push(Segment::Literal(pair.as_str())),
            _ => {}
        }
    }

    Ok(segments)
}

/// Expand `$NAME` and `${NAME}` references. Unknown variables are left as written.
pub fn expand_vars<F>(input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains('$') {
        return Ok(input.to_string());
    }

    let mut out = String::with_capacity(input.len());
    for segment in parse_template(input)? {
        match segment {
            Segment::Variable { name, raw } => match lookup(name) {
                Some(value) => out.push_str(&value),
                None => out.push_str(raw),
            },
            other => out.push_str(other.raw()),
        }
    }
    Ok(out)
}

pub fn contains_placeholder(input: &str) -> bool {
    input.contains(RESULT_FILE_PLACEHOLDER)
}

/// Replace every `<result_file>` marker with `path`, leaving variable references untouched
pub fn substitute_placeholder(input: &str, path: &str) -> Result<String> {
    if !contains_placeholder(input) {
        return Ok(input.to_string());
    }

    let mut out = String::with_capacity(input.len() + path.len());
    for segment in parse_template(input)? {
        match segment {
            Segment::ResultFile => out.push_str(path),
            other => out.push_str(other.raw()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars() -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("HOME".to_string(), "/home/dev".to_string());
        vars.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        vars.insert("_TOOL_1".to_string(), "gcc".to_string());
        vars
    }

    fn expand(input: &str) -> String {
        let vars = vars();
        expand_vars(input, |name| vars.get(name).cloned()).unwrap()
    }

    #[test]
    fn test_parse_segments() {
        let segments = parse_template("run $CC ${FLAGS} > <result_file>").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Literal("run "),
                Segment::Variable { name: "CC", raw: "$CC" },
                Segment::Literal(" "),
                Segment::Variable { name: "FLAGS", raw: "${FLAGS}" },
                Segment::Literal(" > "),
                Segment::ResultFile,
            ]
        );
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(parse_template("").unwrap().is_empty());
    }

    #[test]
    fn test_expand_bare_and_braced() {
        assert_eq!(expand("$HOME/bin"), "/home/dev/bin");
        assert_eq!(expand("${HOME}bin"), "/home/devbin");
        assert_eq!(expand("/opt/bin:$PATH"), "/opt/bin:/usr/bin:/bin");
        assert_eq!(expand("$_TOOL_1"), "gcc");
    }

    #[test]
    fn test_expand_keeps_unknown_variables() {
        assert_eq!(expand("$NOPE and ${ALSO_NOPE}"), "$NOPE and ${ALSO_NOPE}");
    }

    #[test]
    fn test_expand_keeps_stray_dollars() {
        assert_eq!(expand("cost: $5"), "cost: $5");
        assert_eq!(expand("trailing $"), "trailing $");
        assert_eq!(expand("${unterminated"), "${unterminated");
        assert_eq!(expand("$$HOME"), "$/home/dev");
    }

    #[test]
    fn test_expand_leaves_placeholder_alone() {
        assert_eq!(expand("$HOME/<result_file>"), "/home/dev/<result_file>");
    }

    #[test]
    fn test_substitute_placeholder() {
        let out = substitute_placeholder("--out=<result_file>", "/tmp/r.txt").unwrap();
        assert_eq!(out, "--out=/tmp/r.txt");

        let out = substitute_placeholder("<result_file> <result_file>", "x").unwrap();
        assert_eq!(out, "x x");
    }

    #[test]
    fn test_substitute_keeps_variables_verbatim() {
        let out = substitute_placeholder("echo $HOME > <result_file>", "/tmp/r").unwrap();
        assert_eq!(out, "echo $HOME > /tmp/r");
    }

    #[test]
    fn test_substitute_without_placeholder_is_identity() {
        assert!(!contains_placeholder("plain text"));
        assert_eq!(substitute_placeholder("plain <text>", "x").unwrap(), "plain <text>");
    }
}
