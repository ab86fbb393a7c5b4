//! Rule-line scanner for the supported Suricata subset.
//!
//! A rule is `header ( option; option; ... )`. The header is ignored; the
//! option sequence is split on `;` (semicolons inside double quotes do not
//! split) and scanned left to right. Buffer-selector tokens switch the
//! active buffer for subsequent `content`/`pcre` options; `nocase`,
//! `distance:N`, and `within:N` attach to the preceding content match.

use regex::bytes::Regex;
use thiserror::Error;

use super::ast::{Buffer, ContentMatch, ContentModifiers, PcreMatch, Rule};

#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("invalid rule format: missing options")]
    MissingOptions,
    #[error("rule missing 'msg' or 'sid'")]
    MissingMsgOrSid,
    #[error("no supported buffer content or pcre options found")]
    NoSupportedMatches,
    #[error("invalid quoted string format: '{0}'")]
    InvalidQuotedString(String),
    #[error("invalid {key} format: '{option}'")]
    InvalidModifier { key: &'static str, option: String },
    #[error("unterminated hex pattern in '{0}'")]
    UnterminatedHex(String),
    #[error("invalid hex byte '{byte}' in '{pattern}'")]
    InvalidHexByte { byte: String, pattern: String },
    #[error("invalid pcre format: '{0}'")]
    InvalidPcre(String),
    #[error("invalid pcre syntax '{pattern}': {source}")]
    PcreCompile { pattern: String, source: regex::Error },
}

/// Parse a single rule line.
///
/// Returns an error for any rule that should be skipped: malformed
/// options, a PCRE that fails to compile, a missing `msg`/`sid`, or no
/// content/PCRE match attached to an evaluated buffer.
pub fn parse_rule(line: &str) -> Result<Rule, ParseError> {
    let (_, options_part) = line.split_once('(').ok_or(ParseError::MissingOptions)?;
    let options_part = options_part
        .trim()
        .strip_suffix(')')
        .unwrap_or_else(|| options_part.trim());

    let mut rule = Rule::default();
    let mut current_buffer: Option<Buffer> = None;
    let mut last_content: Option<usize> = None;

    for opt in split_options(options_part) {
        let opt = opt.as_str();

        if let Some(buffer) = Buffer::from_token(opt) {
            current_buffer = Some(buffer);
            last_content = None;
            continue;
        }

        if opt.starts_with("msg:") {
            rule.msg = extract_quoted(opt)?;
            last_content = None;
            continue;
        }
        if let Some(value) = opt.strip_prefix("sid:") {
            rule.sid = value.trim().trim_end_matches(';').to_string();
            last_content = None;
            continue;
        }

        if opt == "nocase" || opt.starts_with("distance:") || opt.starts_with("within:") {
            if let Some(idx) = last_content {
                apply_modifier(&mut rule.contents[idx].modifiers, opt)?;
            }
            continue;
        }

        if opt.starts_with("pcre:") {
            if let Some(buffer) = current_buffer.filter(|b| b.is_evaluated()) {
                rule.pcre.push(extract_pcre(opt, buffer)?);
            }
            last_content = None;
            continue;
        }

        if opt.starts_with("content:") {
            let (negated, content_opt) = match opt.strip_prefix("content:!") {
                Some(rest) => (true, format!("content:{}", rest)),
                None => (false, opt.to_string()),
            };
            match current_buffer {
                Some(buffer) if buffer.is_evaluated() => match extract_content(&content_opt) {
                    Ok(pattern) => {
                        rule.contents.push(ContentMatch {
                            buffer,
                            pattern,
                            negated,
                            modifiers: ContentModifiers::default(),
                        });
                        last_content = Some(rule.contents.len() - 1);
                    }
                    Err(_) => {
                        // Unsupported content syntax: drop the option,
                        // keep scanning the rest of the rule.
                        last_content = None;
                    }
                },
                _ => last_content = None,
            }
            continue;
        }

        // Other options (flow, reference, classtype, thresholds,
        // flowbits, ...) are accepted and ignored.
    }

    if rule.contents.is_empty() && rule.pcre.is_empty() {
        return Err(ParseError::NoSupportedMatches);
    }
    if rule.msg.is_empty() || rule.sid.is_empty() {
        return Err(ParseError::MissingMsgOrSid);
    }

    Ok(rule)
}

/// Split an option sequence on `;`, respecting double-quoted strings.
pub fn split_options(options: &str) -> Vec<String> {
    let mut opts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in options.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ';' if !in_quotes => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    opts.push(trimmed.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        opts.push(trimmed.to_string());
    }
    opts
}

/// Extract the first double-quoted run from an option.
fn extract_quoted(option: &str) -> Result<String, ParseError> {
    let start = option
        .find('"')
        .ok_or_else(|| ParseError::InvalidQuotedString(option.to_string()))?;
    let rest = &option[start + 1..];
    let end = rest
        .find('"')
        .ok_or_else(|| ParseError::InvalidQuotedString(option.to_string()))?;
    Ok(rest[..end].to_string())
}

/// Extract and hex-decode a content pattern from a `content:"..."` option.
fn extract_content(option: &str) -> Result<Vec<u8>, ParseError> {
    if !option.starts_with("content:\"") {
        return Err(ParseError::InvalidQuotedString(option.to_string()));
    }
    let raw = extract_quoted(option)?;
    decode_hex_pattern(&raw)
}

fn apply_modifier(modifiers: &mut ContentModifiers, opt: &str) -> Result<(), ParseError> {
    if opt == "nocase" {
        modifiers.nocase = true;
    } else if opt.starts_with("distance:") {
        modifiers.distance = Some(extract_modifier_value(opt, "distance")? as i32);
    } else if opt.starts_with("within:") {
        modifiers.within = Some(extract_modifier_value(opt, "within")?);
    }
    Ok(())
}

fn extract_modifier_value(option: &str, key: &'static str) -> Result<u32, ParseError> {
    option
        .split_once(':')
        .and_then(|(_, v)| v.trim().parse::<u32>().ok())
        .ok_or(ParseError::InvalidModifier {
            key,
            option: option.to_string(),
        })
}

/// Decode hex runs enclosed in pipes, e.g. `foo|3b 0a|bar`. Bytes inside
/// the pipes are space-separated two-digit hex values.
pub fn decode_hex_pattern(s: &str) -> Result<Vec<u8>, ParseError> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'|' {
            let end = s[i + 1..]
                .find('|')
                .map(|rel| i + 1 + rel)
                .ok_or_else(|| ParseError::UnterminatedHex(s.to_string()))?;
            for part in s[i + 1..end].split_whitespace() {
                let value =
                    u8::from_str_radix(part, 16).map_err(|_| ParseError::InvalidHexByte {
                        byte: part.to_string(),
                        pattern: s.to_string(),
                    })?;
                out.push(value);
            }
            i = end + 1;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Parse a `pcre:"/pattern/flags"` option and compile both the anchored
/// form and the substring form used by the `R` flag.
///
/// The `i` flag translates to an `(?i)` prefix; `R` selects the variant
/// with any leading `^` removed; other flags are accepted but ignored.
fn extract_pcre(option: &str, buffer: Buffer) -> Result<PcreMatch, ParseError> {
    const PREFIX: &str = "pcre:\"";
    if !option.starts_with(PREFIX) || !option.ends_with('"') {
        return Err(ParseError::InvalidPcre(option.to_string()));
    }
    let content = &option[PREFIX.len()..option.len() - 1];
    if content.len() < 2 || !content.starts_with('/') {
        return Err(ParseError::InvalidPcre(content.to_string()));
    }
    let last_slash = content[1..]
        .rfind('/')
        .map(|rel| rel + 1)
        .ok_or_else(|| ParseError::InvalidPcre(content.to_string()))?;
    if last_slash == 0 {
        return Err(ParseError::InvalidPcre(content.to_string()));
    }

    let raw_pattern = content[1..last_slash].to_string();
    let flags = content[last_slash + 1..].to_string();
    let ignorecase = flags.contains('i');

    let regex = compile_pcre(&raw_pattern, ignorecase)?;
    let substring = raw_pattern.strip_prefix('^').unwrap_or(&raw_pattern);
    let substring_regex = compile_pcre(substring, ignorecase)?;

    Ok(PcreMatch {
        buffer,
        raw_pattern,
        flags,
        regex,
        substring_regex,
    })
}

fn compile_pcre(pattern: &str, ignorecase: bool) -> Result<Regex, ParseError> {
    let full = if ignorecase {
        format!("(?i){}", pattern)
    } else {
        pattern.to_string()
    };
    Regex::new(&full).map_err(|source| ParseError::PcreCompile {
        pattern: full,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rule_with_two_contents() {
        let line = r#"alert http $EXTERNAL_NET any -> $HTTP_SERVERS any (
            msg:"ET WEB_SERVER SQL Injection BULK INSERT in URI";
            flow:established,to_server;
            http.uri;
            content:"BULK"; nocase;
            content:"INSERT"; nocase; distance:0;
            sid:2011035;
        )"#;
        let rule = parse_rule(line).unwrap();
        assert_eq!(rule.msg, "ET WEB_SERVER SQL Injection BULK INSERT in URI");
        assert_eq!(rule.sid, "2011035");
        assert_eq!(rule.contents.len(), 2);

        assert_eq!(rule.contents[0].buffer, Buffer::Uri);
        assert_eq!(rule.contents[0].pattern, b"BULK");
        assert!(rule.contents[0].modifiers.nocase);
        assert_eq!(rule.contents[1].pattern, b"INSERT");
        assert!(rule.contents[1].modifiers.nocase);
        assert_eq!(rule.contents[1].modifiers.distance, Some(0));
    }

    #[test]
    fn rule_without_content_is_rejected() {
        let line = r#"alert http any any -> any any (
            msg:"Invalid rule"; flow:established,to_server; http.uri;
        )"#;
        assert!(matches!(
            parse_rule(line),
            Err(ParseError::NoSupportedMatches)
        ));
    }

    #[test]
    fn rule_missing_msg_is_rejected() {
        let line = r#"alert http any any -> any any (
            flow:established,to_server; http.uri; content:"test"; nocase; sid:1000002;
        )"#;
        assert!(matches!(parse_rule(line), Err(ParseError::MissingMsgOrSid)));
    }

    #[test]
    fn rule_missing_sid_is_rejected() {
        let line = r#"alert http any any -> any any (
            msg:"Missing SID"; flow:established,to_server; http.uri; content:"test"; nocase;
        )"#;
        assert!(matches!(parse_rule(line), Err(ParseError::MissingMsgOrSid)));
    }

    #[test]
    fn content_on_legacy_buffer_is_dropped() {
        let line = r#"alert http any any -> any any (
            msg:"Legacy only"; http_request_line; content:"GET /"; sid:77;
        )"#;
        assert!(matches!(
            parse_rule(line),
            Err(ParseError::NoSupportedMatches)
        ));
    }

    #[test]
    fn negated_content() {
        let line = r#"alert http any any -> any any (
            msg:"Neg"; http.request_body; content:"foo|3b|bar"; content:!"deny"; sid:42;
        )"#;
        let rule = parse_rule(line).unwrap();
        assert_eq!(rule.contents.len(), 2);
        assert_eq!(rule.contents[0].pattern, b"foo;bar");
        assert!(!rule.contents[0].negated);
        assert_eq!(rule.contents[1].pattern, b"deny");
        assert!(rule.contents[1].negated);
    }

    #[test]
    fn hex_decoding_in_content() {
        let line = r#"alert http any any -> any any (
            msg:"HexTest"; flow:established,to_server; http.uri;
            content:"foo|3b|bar"; nocase; sid:1234;
        )"#;
        let rule = parse_rule(line).unwrap();
        assert_eq!(rule.sid, "1234");
        assert_eq!(rule.contents[0].pattern, b"foo;bar");
        assert!(rule.contents[0].modifiers.nocase);
    }

    #[test]
    fn pcre_rule() {
        let line = r#"alert http any any -> any any (
            msg:"PcreTest"; flow:established,to_server; http.uri;
            pcre:"/abc[0-9]+/i"; sid:5678;
        )"#;
        let rule = parse_rule(line).unwrap();
        assert_eq!(rule.pcre.len(), 1);
        let pm = &rule.pcre[0];
        assert_eq!(pm.buffer, Buffer::Uri);
        assert!(pm.regex.is_match(b"abc123"));
        assert!(pm.regex.is_match(b"ABC123"));
    }

    #[test]
    fn invalid_pcre_skips_rule() {
        let line = r#"alert http any any -> any any (
            msg:"Bad"; http.uri; pcre:"/(/"; sid:9;
        )"#;
        assert!(matches!(
            parse_rule(line),
            Err(ParseError::PcreCompile { .. })
        ));
    }

    #[test]
    fn decode_hex_cases() {
        assert_eq!(decode_hex_pattern("abc").unwrap(), b"abc");
        assert_eq!(decode_hex_pattern("|41|").unwrap(), b"A");
        assert_eq!(decode_hex_pattern("foo|3b|bar").unwrap(), b"foo;bar");
        assert_eq!(decode_hex_pattern("|41 42|").unwrap(), b"AB");
        assert_eq!(decode_hex_pattern("x|20|y|21|z").unwrap(), b"x y!z");
        assert!(matches!(
            decode_hex_pattern("foo|41"),
            Err(ParseError::UnterminatedHex(_))
        ));
        assert!(matches!(
            decode_hex_pattern("|zz|"),
            Err(ParseError::InvalidHexByte { .. })
        ));
    }

    #[test]
    fn split_options_respects_quotes() {
        assert_eq!(
            split_options(r#"msg:"Test rule"; content:"/test"; nocase; distance:3;"#),
            vec![
                r#"msg:"Test rule""#,
                r#"content:"/test""#,
                "nocase",
                "distance:3"
            ]
        );
        assert_eq!(
            split_options(r#"msg:"Rule; with semicolon"; content:"/test;path/"; nocase;"#),
            vec![
                r#"msg:"Rule; with semicolon""#,
                r#"content:"/test;path/""#,
                "nocase"
            ]
        );
        assert!(split_options("").is_empty());
        assert!(split_options("   ;  ; ").is_empty());
    }

    #[test]
    fn modifier_values() {
        let line = r#"alert http any any -> any any (
            msg:"Mods"; http.uri; content:"a"; distance:5; within:10; sid:1;
        )"#;
        let rule = parse_rule(line).unwrap();
        assert_eq!(rule.contents[0].modifiers.distance, Some(5));
        assert_eq!(rule.contents[0].modifiers.within, Some(10));
    }

    #[test]
    fn invalid_modifier_value_skips_rule() {
        let line = r#"alert http any any -> any any (
            msg:"Mods"; http.uri; content:"a"; distance:five; sid:1;
        )"#;
        assert!(matches!(
            parse_rule(line),
            Err(ParseError::InvalidModifier { .. })
        ));
    }

    #[test]
    fn pcre_relative_flag_strips_anchor() {
        let line = r#"alert http any any -> any any (
            msg:"Rel"; http.uri; pcre:"/^\/admin/iR"; sid:2;
        )"#;
        let rule = parse_rule(line).unwrap();
        let pm = &rule.pcre[0];
        assert!(pm.is_relative());
        assert!(!pm.regex.is_match(b"x/Admin"));
        assert!(pm.substring_regex.is_match(b"x/Admin"));
    }
}
