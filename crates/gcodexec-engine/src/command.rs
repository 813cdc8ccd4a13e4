//! Decoded commands
//!
//! A deliberately small line decoder: it separates the command letter and
//! number from the parameters and offers typed accessors over them. It
//! understands line numbers, checksums, `;` and `( )` comments and quoted
//! strings, and nothing of the expression language some hosts send.

use gcodexec_core::CommandError;
use std::fmt;

/// Commands whose argument is a bare string rather than parameters
const STRING_ARGUMENT_COMMANDS: [i32; 3] = [23, 30, 32];

/// One decoded line
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCommand {
    /// Command letter: `G`, `M` or `T`
    pub letter: char,
    /// Command number; absent for a bare `T`
    pub number: Option<i32>,
    /// Digit after the decimal point, as in `G59.1`
    pub fraction: Option<u32>,
    /// Parameter letters and their unparsed values, in order of appearance
    params: Vec<(char, String)>,
    /// Everything after the command word, for commands taking a bare string
    remainder: String,
    /// The line as received, comments removed
    pub raw: String,
    /// Prefixed with G53
    pub machine_coordinates: bool,
}

impl DecodedCommand {
    /// Decode one line
    ///
    /// Returns `Ok(None)` for a line holding only whitespace, a line number
    /// or a comment.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let cleaned = strip_comments(line);
        let mut text = cleaned.trim();

        // Line number
        if text.starts_with(['N', 'n']) {
            let digits = text[1..]
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(text.len() - 1);
            text = text[1 + digits..].trim_start();
        }
        if text.is_empty() {
            return Ok(None);
        }

        let mut command = Self::parse_word(text)?;
        if command.letter == 'G' && command.number == Some(53) && command.fraction.is_none() {
            let rest = command.remainder.trim();
            if rest.starts_with(['G', 'g']) {
                let mut inner = Self::parse_word(rest)?;
                inner.machine_coordinates = true;
                inner.raw = text.to_string();
                command = inner;
            }
        }
        Ok(Some(command))
    }

    fn parse_word(text: &str) -> Result<Self, CommandError> {
        let mut chars = text.char_indices().peekable();
        let letter = match chars.next() {
            Some((_, c)) if c.is_ascii_alphabetic() => c.to_ascii_uppercase(),
            _ => return Err(CommandError::invalid(format!("Bad command: {}", text))),
        };
        if !matches!(letter, 'G' | 'M' | 'T') {
            return Err(CommandError::invalid(format!("Bad command: {}", text)));
        }

        let mut end = 1;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_ascii_digit() || c == '.' || ((c == '-' || c == '+') && i == 1) {
                end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let number_text = &text[1..end];
        let (number, fraction) = if number_text.is_empty() {
            if letter != 'T' {
                return Err(CommandError::invalid(format!("Bad command: {}", text)));
            }
            (None, None)
        } else {
            let (whole, frac) = match number_text.split_once('.') {
                Some((whole, frac)) => (whole, Some(frac)),
                None => (number_text, None),
            };
            let number = whole
                .parse::<i32>()
                .map_err(|_| CommandError::invalid(format!("Bad command: {}", text)))?;
            let fraction = match frac {
                Some(f) if !f.is_empty() => Some(
                    f.parse::<u32>()
                        .map_err(|_| CommandError::invalid(format!("Bad command: {}", text)))?,
                ),
                _ => None,
            };
            (Some(number), fraction)
        };

        let remainder = text[end..].trim().to_string();
        let takes_string = letter == 'M'
            && number.is_some_and(|n| STRING_ARGUMENT_COMMANDS.contains(&n));
        let params = if takes_string {
            Vec::new()
        } else {
            parse_params(&remainder)?
        };

        Ok(Self {
            letter,
            number,
            fraction,
            params,
            remainder,
            raw: text.to_string(),
            machine_coordinates: false,
        })
    }

    /// True if this is `letter` `number` with no fraction
    pub fn is(&self, letter: char, number: i32) -> bool {
        self.letter == letter && self.number == Some(number)
    }

    /// Check whether a parameter is present
    pub fn seen(&self, param: char) -> bool {
        self.params.iter().any(|(p, _)| *p == param)
    }

    /// The unparsed value of a parameter
    pub fn value(&self, param: char) -> Option<&str> {
        self.params
            .iter()
            .find(|(p, _)| *p == param)
            .map(|(_, v)| v.as_str())
    }

    /// Parameters in order of appearance
    pub fn params(&self) -> impl Iterator<Item = (char, &str)> {
        self.params.iter().map(|(p, v)| (*p, v.as_str()))
    }

    /// A numeric parameter, if present
    pub fn float(&self, param: char) -> Result<Option<f64>, CommandError> {
        self.value(param)
            .map(|v| parse_float(param, v))
            .transpose()
    }

    /// A numeric parameter that must be present
    pub fn get_float(&self, param: char) -> Result<f64, CommandError> {
        self.float(param)?.ok_or_else(|| missing(self, param))
    }

    /// A non-negative integer parameter, if present
    pub fn uint(&self, param: char) -> Result<Option<u32>, CommandError> {
        match self.int(param)? {
            Some(v) if v < 0 => Err(CommandError::invalid(format!(
                "{}: parameter '{}' must not be negative",
                self.code(),
                param
            ))),
            Some(v) => Ok(Some(v as u32)),
            None => Ok(None),
        }
    }

    /// A non-negative integer parameter that must be present
    pub fn get_uint(&self, param: char) -> Result<u32, CommandError> {
        self.uint(param)?.ok_or_else(|| missing(self, param))
    }

    /// An integer parameter, if present
    pub fn int(&self, param: char) -> Result<Option<i32>, CommandError> {
        self.float(param).map(|v| v.map(|f| f.round() as i32))
    }

    /// A string parameter, quoted or bare
    pub fn string(&self, param: char) -> Result<Option<String>, CommandError> {
        self.value(param).map(unquote).transpose()
    }

    /// A colon-separated list of numbers
    pub fn float_list(&self, param: char) -> Result<Option<Vec<f64>>, CommandError> {
        self.value(param)
            .map(|v| v.split(':').map(|item| parse_float(param, item)).collect())
            .transpose()
    }

    /// The bare string argument of M23, M32 and similar
    pub fn unprecedented_string(&self) -> Result<String, CommandError> {
        let text = self.remainder.trim();
        if text.is_empty() {
            return Err(CommandError::invalid(format!(
                "{}: missing filename",
                self.code()
            )));
        }
        unquote(text)
    }

    /// The command word, e.g. `G1`, `G59.1`, `T`
    pub fn code(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DecodedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter)?;
        if let Some(number) = self.number {
            write!(f, "{}", number)?;
        }
        if let Some(fraction) = self.fraction {
            write!(f, ".{}", fraction)?;
        }
        Ok(())
    }
}

fn missing(command: &DecodedCommand, param: char) -> CommandError {
    CommandError::invalid(format!(
        "{}: missing parameter '{}'",
        command.code(),
        param
    ))
}

fn parse_float(param: char, text: &str) -> Result<f64, CommandError> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            CommandError::invalid(format!(
                "expected number after '{}' but found '{}'",
                param, text
            ))
        })
}

fn unquote(text: &str) -> Result<String, CommandError> {
    let Some(inner) = text.strip_prefix('"') else {
        return Ok(text.to_string());
    };
    let Some(inner) = inner.strip_suffix('"') else {
        return Err(CommandError::invalid(format!(
            "unterminated string: {}",
            text
        )));
    };
    Ok(inner.replace("\"\"", "\""))
}

/// Remove `;` and `( )` comments and a trailing checksum outside quotes
fn strip_comments(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_quotes = false;
    let mut in_brackets = false;
    for c in line.chars() {
        if in_brackets {
            if c == ')' {
                in_brackets = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_quotes = !in_quotes;
                out.push(c);
            }
            ';' | '*' if !in_quotes => break,
            '(' if !in_quotes => in_brackets = true,
            _ => out.push(c),
        }
    }
    out
}

fn parse_params(text: &str) -> Result<Vec<(char, String)>, CommandError> {
    let mut params = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if !c.is_ascii_alphabetic() {
            return Err(CommandError::invalid(format!(
                "unexpected '{}' in parameters '{}'",
                c, text
            )));
        }
        let letter = c.to_ascii_uppercase();
        i += 1;
        let mut value = String::new();
        if i < chars.len() && chars[i] == '"' {
            value.push('"');
            i += 1;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(CommandError::invalid(format!(
                            "unterminated string in '{}'",
                            text
                        )))
                    }
                    Some('"') if chars.get(i + 1) == Some(&'"') => {
                        value.push_str("\"\"");
                        i += 2;
                    }
                    Some('"') => {
                        value.push('"');
                        i += 1;
                        break;
                    }
                    Some(&other) => {
                        value.push(other);
                        i += 1;
                    }
                }
            }
        } else {
            while i < chars.len() {
                let v = chars[i];
                if v.is_ascii_digit() || matches!(v, '.' | '-' | '+' | ':') {
                    value.push(v);
                    i += 1;
                } else {
                    break;
                }
            }
        }
        params.push((letter, value));
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> DecodedCommand {
        DecodedCommand::parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_parse_move() {
        let cmd = parse("G1 X10.5 Y-3 F3000 ; comment");
        assert!(cmd.is('G', 1));
        assert_eq!(cmd.float('X').unwrap(), Some(10.5));
        assert_eq!(cmd.float('Y').unwrap(), Some(-3.0));
        assert_eq!(cmd.get_float('F').unwrap(), 3000.0);
        assert!(!cmd.seen('Z'));
        assert!(cmd.get_float('Z').is_err());
    }

    #[test]
    fn test_parse_compact_and_lowercase() {
        let cmd = parse("g1x1y2e0.5");
        assert!(cmd.is('G', 1));
        assert_eq!(cmd.float('X').unwrap(), Some(1.0));
        assert_eq!(cmd.float('E').unwrap(), Some(0.5));
    }

    #[test]
    fn test_blank_and_comment_lines() {
        assert_eq!(DecodedCommand::parse("").unwrap(), None);
        assert_eq!(DecodedCommand::parse("   ; only a comment").unwrap(), None);
        assert_eq!(DecodedCommand::parse("(bracket comment)").unwrap(), None);
        assert_eq!(DecodedCommand::parse("N10").unwrap(), None);
    }

    #[test]
    fn test_line_number_and_checksum() {
        let cmd = parse("N42 G92 E0*71");
        assert!(cmd.is('G', 92));
        assert_eq!(cmd.float('E').unwrap(), Some(0.0));
    }

    #[test]
    fn test_fraction_and_tool() {
        let cmd = parse("G59.2");
        assert_eq!(cmd.number, Some(59));
        assert_eq!(cmd.fraction, Some(2));
        assert_eq!(cmd.code(), "G59.2");

        let cmd = parse("T-1");
        assert_eq!(cmd.number, Some(-1));
        let cmd = parse("T");
        assert_eq!(cmd.number, None);
    }

    #[test]
    fn test_g53_prefix() {
        let cmd = parse("G53 G1 X5");
        assert!(cmd.is('G', 1));
        assert!(cmd.machine_coordinates);

        let cmd = parse("G53");
        assert!(cmd.is('G', 53));
    }

    #[test]
    fn test_strings() {
        let cmd = parse("M98 P\"homex.g\"");
        assert_eq!(cmd.string('P').unwrap(), Some("homex.g".to_string()));

        let cmd = parse("M291 P\"say \"\"hi\"\"; now\" S2");
        assert_eq!(cmd.string('P').unwrap(), Some("say \"hi\"; now".to_string()));
        assert_eq!(cmd.uint('S').unwrap(), Some(2));

        let cmd = parse("M23 Part One.gcode");
        assert_eq!(cmd.unprecedented_string().unwrap(), "Part One.gcode");
    }

    #[test]
    fn test_float_list() {
        let cmd = parse("G1 E0.1:0.2:0.3");
        assert_eq!(cmd.float_list('E').unwrap(), Some(vec![0.1, 0.2, 0.3]));
    }

    #[test]
    fn test_bad_lines() {
        assert!(DecodedCommand::parse("X10").is_err());
        assert!(DecodedCommand::parse("G").is_err());
        assert!(DecodedCommand::parse("G1 X\"unterminated").is_err());
        let cmd = parse("G1 X");
        assert!(cmd.seen('X'));
        assert!(cmd.float('X').is_err());
        assert!(parse("M220 S-5").uint('S').is_err());
    }
}
