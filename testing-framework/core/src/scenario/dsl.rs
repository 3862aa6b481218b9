//! Parser for step lines such as
//! `alice: reports block height is at least 6 within 200 seconds` or
//! `alice: js-script ./register.js with "2000,2001" return is 0 within 600 seconds`.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use super::step::{MetricQuery, Predicate, ScriptRuntime, StepKind, Value};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid step `{line}`: {message}")]
pub struct DslError {
    pub line: String,
    pub message: String,
}

/// Result of parsing one line; timeout defaults are applied by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedLine {
    pub actor: String,
    pub kind: StepKind,
    pub within: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
}

impl Token {
    fn text(&self) -> &str {
        match self {
            Self::Word(text) | Self::Quoted(text) => text,
        }
    }

    fn is_word(&self, expected: &str) -> bool {
        matches!(self, Self::Word(word) if word.eq_ignore_ascii_case(expected))
    }

    fn is_comparator(&self) -> bool {
        matches!(self, Self::Word(word) if COMPARATORS.contains(&word.as_str()))
    }
}

/// Upper bound on a `within` clause: thirty days.
const MAX_WITHIN_SECS: u64 = 30 * 24 * 60 * 60;

const COMPARATORS: [&str; 5] = ["==", ">=", "<=", ">", "<"];

pub fn parse_line(line: &str) -> Result<ParsedLine, DslError> {
    let error = |message: String| DslError {
        line: line.trim().to_owned(),
        message,
    };

    let (actor, body) = line
        .split_once(':')
        .ok_or_else(|| error("expected `<node>: <action>`".to_owned()))?;
    let actor = actor.trim();
    if actor.is_empty() || actor.contains(char::is_whitespace) {
        return Err(error(format!("invalid node name `{actor}`")));
    }

    let tokens = tokenize(body).map_err(error)?;
    let mut parser = Parser { tokens, pos: 0 };
    let (kind, within) = parser.parse_body().map_err(error)?;

    Ok(ParsedLine {
        actor: actor.to_owned(),
        kind,
        within,
    })
}

/// Split on whitespace. A token starting with `"` runs to the closing quote;
/// quotes inside a word (label sets) are kept and protect their spaces.
fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        if ch == '"' {
            chars.next();
            let mut quoted = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some(c) => quoted.push(c),
                    None => return Err("unterminated quoted string".to_owned()),
                }
            }
            tokens.push(Token::Quoted(quoted));
            continue;
        }

        let mut word = String::new();
        let mut in_quotes = false;
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() && !in_quotes {
                break;
            }
            if c == '"' {
                in_quotes = !in_quotes;
            }
            word.push(c);
            chars.next();
        }
        if in_quotes {
            return Err(format!("unterminated quote in `{word}`"));
        }
        tokens.push(Token::Word(word));
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_word(&self, expected: &str) -> bool {
        self.peek().is_some_and(|token| token.is_word(expected))
    }

    fn eat_word(&mut self, expected: &str) -> bool {
        if self.peek_word(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, expected: &str) -> Result<(), String> {
        if self.eat_word(expected) {
            Ok(())
        } else {
            Err(match self.peek() {
                Some(token) => format!("expected `{expected}`, found `{}`", token.text()),
                None => format!("expected `{expected}` at end of line"),
            })
        }
    }

    fn parse_body(&mut self) -> Result<(StepKind, Option<Duration>), String> {
        let keyword = self
            .next()
            .ok_or_else(|| "missing action after node name".to_owned())?;

        let kind = match keyword.text().to_ascii_lowercase().as_str() {
            "reports" => self.parse_report()?,
            "js-script" => self.parse_script(ScriptRuntime::NodeJs)?,
            "run" => self.parse_script(ScriptRuntime::Executable)?,
            "is" => {
                self.expect_word("up")?;
                StepKind::IsUp
            }
            other => return Err(format!("unknown action `{other}`")),
        };

        let within = self.parse_within()?;
        if let Some(token) = self.peek() {
            return Err(format!("unexpected `{}`", token.text()));
        }
        Ok((kind, within))
    }

    fn parse_report(&mut self) -> Result<StepKind, String> {
        let mut words = Vec::new();
        while let Some(token) = self.peek() {
            if token.is_word("is") || token.is_comparator() {
                break;
            }
            words.push(token.text().to_owned());
            self.pos += 1;
        }
        if words.is_empty() {
            return Err("missing metric name after `reports`".to_owned());
        }
        // `is` may be left out before a symbolic comparator.
        if !self.peek().is_some_and(Token::is_comparator) {
            self.expect_word("is")?;
        }

        let metric = resolve_metric(&words)?;
        let predicate = self.parse_comparison()?;
        Ok(StepKind::Report { metric, predicate })
    }

    fn parse_script(&mut self, runtime: ScriptRuntime) -> Result<StepKind, String> {
        let path = match self.next() {
            Some(token) if !token.is_word("with") && !token.is_word("within") => {
                PathBuf::from(token.text())
            }
            _ => return Err(format!("missing script path after `{}`", runtime.keyword())),
        };

        let args = if self.eat_word("with") {
            let raw = self
                .next()
                .ok_or_else(|| "missing arguments after `with`".to_owned())?;
            split_script_args(raw.text())
        } else {
            Vec::new()
        };

        let expected = if self.eat_word("return") {
            self.expect_word("is")?;
            self.parse_comparison()?
        } else {
            Predicate::Equals(Value::Int(0))
        };

        Ok(StepKind::Script {
            runtime,
            path,
            args,
            expected,
        })
    }

    fn parse_comparison(&mut self) -> Result<Predicate, String> {
        if self.eat_word("equal") {
            self.expect_word("to")?;
            return Ok(Predicate::Equals(self.parse_value()?));
        }
        if self.eat_word("at") {
            if self.eat_word("least") {
                return Ok(Predicate::AtLeast(self.parse_int()?));
            }
            if self.eat_word("most") {
                return Ok(Predicate::AtMost(self.parse_int()?));
            }
            return Err("expected `least` or `most` after `at`".to_owned());
        }
        if self.eat_word("greater") {
            self.expect_word("than")?;
            return Ok(Predicate::GreaterThan(self.parse_int()?));
        }
        if self.eat_word("lower") || self.eat_word("less") {
            self.expect_word("than")?;
            return Ok(Predicate::LessThan(self.parse_int()?));
        }

        match self.peek().map(Token::text) {
            Some("==") => {
                self.pos += 1;
                Ok(Predicate::Equals(self.parse_value()?))
            }
            Some(">=") => {
                self.pos += 1;
                Ok(Predicate::AtLeast(self.parse_int()?))
            }
            Some("<=") => {
                self.pos += 1;
                Ok(Predicate::AtMost(self.parse_int()?))
            }
            Some(">") => {
                self.pos += 1;
                Ok(Predicate::GreaterThan(self.parse_int()?))
            }
            Some("<") => {
                self.pos += 1;
                Ok(Predicate::LessThan(self.parse_int()?))
            }
            _ => Ok(Predicate::Equals(self.parse_value()?)),
        }
    }

    fn parse_value(&mut self) -> Result<Value, String> {
        match self.next() {
            Some(Token::Quoted(text)) => Ok(Value::Text(text)),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("within") => {
                Err("missing expected value".to_owned())
            }
            Some(Token::Word(word)) => Ok(Value::parse(&word)),
            None => Err("missing expected value".to_owned()),
        }
    }

    fn parse_int(&mut self) -> Result<i64, String> {
        let token = self
            .next()
            .ok_or_else(|| "missing numeric bound".to_owned())?;
        token
            .text()
            .parse::<i64>()
            .map_err(|_| format!("`{}` is not an integer", token.text()))
    }

    fn parse_within(&mut self) -> Result<Option<Duration>, String> {
        if !self.eat_word("within") {
            return Ok(None);
        }
        let token = self
            .next()
            .ok_or_else(|| "missing duration after `within`".to_owned())?;
        let amount = token
            .text()
            .parse::<u64>()
            .map_err(|_| format!("`{}` is not a number of seconds", token.text()))?;

        let unit = self.next().ok_or_else(|| "missing time unit".to_owned())?;
        let secs = match unit.text().to_ascii_lowercase().as_str() {
            "seconds" | "second" | "secs" | "sec" | "s" => Some(amount),
            "minutes" | "minute" | "mins" | "min" => amount.checked_mul(60),
            other => return Err(format!("unknown time unit `{other}`")),
        };
        match secs {
            Some(secs) if secs <= MAX_WITHIN_SECS => Ok(Some(Duration::from_secs(secs))),
            _ => Err(format!(
                "`within {amount} {}` exceeds the {MAX_WITHIN_SECS}s limit",
                unit.text()
            )),
        }
    }
}

/// Human-friendly metric names map onto their Prometheus series.
fn resolve_metric(words: &[String]) -> Result<MetricQuery, String> {
    let phrase = words.join(" ").to_ascii_lowercase();
    let aliased = match phrase.as_str() {
        "block height" | "best block" => {
            Some(MetricQuery::new("block_height").with_label("status", "best"))
        }
        "finalised height" | "finalized height" | "finalised block" | "finalized block" => {
            Some(MetricQuery::new("block_height").with_label("status", "finalized"))
        }
        "peers count" | "peer count" | "peers" => Some(MetricQuery::new("sub_libp2p_peers_count")),
        _ => None,
    };
    if let Some(query) = aliased {
        return Ok(query);
    }

    match words {
        [single] => MetricQuery::parse(single),
        _ => Ok(MetricQuery::new(words.join("_"))),
    }
}

/// Comma-separated script args; empty elements are kept so positions stay
/// stable for the script.
fn split_script_args(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(',').map(str::to_owned).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_report_with_alias_and_timeout() {
        let parsed =
            parse_line("collator01: reports block height is at least 6 within 200 seconds")
                .unwrap();
        assert_eq!(parsed.actor, "collator01");
        assert_eq!(parsed.within, Some(Duration::from_secs(200)));
        assert_eq!(
            parsed.kind,
            StepKind::Report {
                metric: MetricQuery::new("block_height").with_label("status", "best"),
                predicate: Predicate::AtLeast(6),
            }
        );
    }

    #[test]
    fn parses_report_equality_without_timeout() {
        let parsed = parse_line("alice: reports node_roles is 4").unwrap();
        assert_eq!(parsed.within, None);
        assert_eq!(
            parsed.kind,
            StepKind::Report {
                metric: MetricQuery::new("node_roles"),
                predicate: Predicate::Equals(Value::Int(4)),
            }
        );
    }

    #[test]
    fn parses_report_with_inline_labels() {
        let parsed =
            parse_line(r#"alice: reports block_height{status="finalized"} is greater than 2"#)
                .unwrap();
        let StepKind::Report { metric, predicate } = parsed.kind else {
            panic!("expected report step");
        };
        assert_eq!(metric.labels, [("status".to_owned(), "finalized".to_owned())]);
        assert_eq!(predicate, Predicate::GreaterThan(2));
    }

    #[test]
    fn parses_js_script_with_args_and_return() {
        let parsed = parse_line(
            r#"alice: js-script ./assign-core.js with "0,2000,14400,2001,14400," return is 0 within 600 seconds"#,
        )
        .unwrap();
        assert_eq!(parsed.within, Some(Duration::from_secs(600)));
        assert_eq!(
            parsed.kind,
            StepKind::Script {
                runtime: ScriptRuntime::NodeJs,
                path: PathBuf::from("./assign-core.js"),
                args: ["0", "2000", "14400", "2001", "14400", ""]
                    .map(str::to_owned)
                    .to_vec(),
                expected: Predicate::Equals(Value::Int(0)),
            }
        );
    }

    #[test]
    fn script_without_return_expects_zero() {
        let parsed = parse_line("alice: run ./setup.sh").unwrap();
        assert_eq!(
            parsed.kind,
            StepKind::Script {
                runtime: ScriptRuntime::Executable,
                path: PathBuf::from("./setup.sh"),
                args: Vec::new(),
                expected: Predicate::Equals(Value::Int(0)),
            }
        );
    }

    #[test]
    fn parses_is_up() {
        let parsed = parse_line("bob: is up within 2 minutes").unwrap();
        assert_eq!(parsed.kind, StepKind::IsUp);
        assert_eq!(parsed.within, Some(Duration::from_secs(120)));
    }

    #[test]
    fn parses_symbolic_and_text_comparisons() {
        let parsed = parse_line("alice: reports peers count >= 3").unwrap();
        assert!(matches!(
            parsed.kind,
            StepKind::Report {
                predicate: Predicate::AtLeast(3),
                ..
            }
        ));

        let parsed = parse_line("alice: reports peers count is < 10 within 5 seconds").unwrap();
        assert_eq!(parsed.within, Some(Duration::from_secs(5)));
        assert_eq!(
            parsed.kind,
            StepKind::Report {
                metric: MetricQuery::new("sub_libp2p_peers_count"),
                predicate: Predicate::LessThan(10),
            }
        );

        let parsed = parse_line(r#"alice: reports chain_name is "rococo local""#).unwrap();
        assert!(matches!(
            parsed.kind,
            StepKind::Report {
                predicate: Predicate::Equals(Value::Text(ref text)),
                ..
            } if text == "rococo local"
        ));
    }

    #[test]
    fn rejects_malformed_lines() {
        let cases = [
            ("reports block height is 6", "expected `<node>: <action>`"),
            ("alice: reports is 6", "missing metric name"),
            ("alice: reports block height is at least six", "not an integer"),
            ("alice: reports block height is 6 within 5 fortnights", "unknown time unit"),
            ("alice: dances", "unknown action"),
            ("alice: js-script", "missing script path"),
            (r#"alice: js-script ./a.js with "1,2"#, "unterminated"),
            ("alice: is up now", "unexpected `now`"),
            ("alice: reports >= 3", "missing metric name"),
            (
                "alice: is up within 18446744073709551615 minutes",
                "exceeds the 2592000s limit",
            ),
            ("alice: is up within 2592001 seconds", "exceeds the 2592000s limit"),
        ];

        for (line, needle) in cases {
            let err = parse_line(line).unwrap_err();
            assert!(
                err.message.contains(needle),
                "`{line}` produced `{}`, expected it to mention `{needle}`",
                err.message
            );
        }
    }
}
