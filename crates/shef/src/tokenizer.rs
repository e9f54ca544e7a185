//! Message assembly (C2)
//!
//! Turns a line-oriented byte stream into complete SHEF message records:
//! one record per `.A`/`.B`/`.E` message including its continuation lines,
//! with throwaway `:comment:` text stripped. The tokenizer never rejects
//! input; a dot-line that is not a valid message start becomes an
//! `Unrecognized` record that the decoder drops with a warning.

use std::collections::VecDeque;
use std::io::BufRead;

use lazy_static::lazy_static;
use log::{debug, error};
use regex::Regex;

use crate::error::ShefError;

lazy_static! {
    static ref MSG_START: Regex = Regex::new(r"(?i)^\.[ABE]R?\s").expect("bad start regexp");
    static ref CONTINUATION: Regex =
        Regex::new(r"(?i)^\.([ABE])(R?)(\d{1,2})").expect("bad continuation regexp");
}

/// The message family of a record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// `.A`: single time, several parameters
    A,
    /// `.B`: tabular body terminated by `.END`
    B,
    /// `.E`: one parameter at equal intervals
    E,
    /// A dot-line that matched no rule; carries no values
    Unrecognized,
}

/// One complete message, ready for the decoder
#[derive(Clone, Debug)]
pub struct MessageRecord {
    pub kind: MessageKind,
    pub revised: bool,
    /// Comment-stripped logical text, lines joined with `\n`.
    /// `.B` records always end with a `.END` line.
    pub text: String,
    /// 1-based line number of the message start
    pub line_number: usize,
}

/// Lazily assembles [`MessageRecord`]s from a reader
///
/// Not restartable; the reader is consumed.
pub struct Tokenizer<R> {
    input: R,
    pushback: VecDeque<String>,
    line_number: usize,
    eof: bool,
}

impl<R: BufRead> Tokenizer<R> {
    pub fn new(input: R) -> Self {
        Tokenizer {
            input,
            pushback: VecDeque::new(),
            line_number: 0,
            eof: false,
        }
    }

    /// Lines consumed so far
    pub fn lines_read(&self) -> usize {
        self.line_number
    }

    // next raw line, or None at end of input
    fn next_line(&mut self) -> Result<Option<String>, ShefError> {
        if let Some(line) = self.pushback.pop_front() {
            self.line_number += 1;
            return Ok(Some(line));
        }
        if self.eof {
            return Ok(None);
        }
        let mut buf = String::new();
        let n = self.input.read_line(&mut buf)?;
        if n == 0 {
            self.eof = true;
            return Ok(None);
        }
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        self.line_number += 1;
        Ok(Some(buf))
    }

    fn unread(&mut self, line: String) {
        self.line_number -= 1;
        self.pushback.push_front(line);
    }

    /// Assemble the next message
    ///
    /// Returns `Ok(None)` at end of input. I/O failures are fatal.
    pub fn next_message(&mut self) -> Result<Option<MessageRecord>, ShefError> {
        loop {
            let raw = match self.next_line()? {
                Some(line) => line,
                None => return Ok(None),
            };
            let line = clean_line(&raw);
            if line.is_empty() || !raw.starts_with('.') {
                continue;
            }
            if !MSG_START.is_match(&line) {
                // a continuation with no message in progress falls out here
                error!("invalid line at {}: [{}]", self.line_number, raw);
                return Ok(Some(MessageRecord {
                    kind: MessageKind::Unrecognized,
                    revised: false,
                    text: line,
                    line_number: self.line_number,
                }));
            }
            let kind = match line.as_bytes()[1].to_ascii_uppercase() {
                b'A' => MessageKind::A,
                b'B' => MessageKind::B,
                b'E' => MessageKind::E,
                _ => unreachable!("start pattern admits only A, B, E"),
            };
            let revised = line.as_bytes()[2].to_ascii_uppercase() == b'R';
            let start_line = self.line_number;
            let record = if kind == MessageKind::B {
                self.assemble_b(line, revised, start_line)?
            } else {
                self.assemble_a_e(kind, line, revised, start_line)?
            };
            debug!(
                "assembled {:?} message starting at line {}",
                record.kind, record.line_number
            );
            return Ok(Some(record));
        }
    }

    // .A and .E messages: the header line plus .Xn continuations
    fn assemble_a_e(
        &mut self,
        kind: MessageKind,
        first: String,
        revised: bool,
        start_line: usize,
    ) -> Result<MessageRecord, ShefError> {
        let letter = match kind {
            MessageKind::A => 'A',
            MessageKind::E => 'E',
            _ => unreachable!(),
        };
        let mut lines = vec![first];
        while let Some(raw) = self.next_line()? {
            let line = clean_line(&raw);
            if is_continuation(&line, letter, revised) {
                lines.push(line);
            } else {
                self.unread(raw);
                break;
            }
        }
        Ok(MessageRecord {
            kind,
            revised,
            text: lines.join("\n"),
            line_number: start_line,
        })
    }

    // .B messages: header continuations, then data rows until .END
    fn assemble_b(
        &mut self,
        first: String,
        revised: bool,
        start_line: usize,
    ) -> Result<MessageRecord, ShefError> {
        let mut lines = vec![first];
        let mut in_header = true;
        loop {
            let raw = match self.next_line()? {
                Some(line) => line,
                None => {
                    error!(
                        ".B message at line {} not finished before input exhausted - missing \
                         \".END\" appended",
                        start_line
                    );
                    lines.push(".END".to_string());
                    break;
                }
            };
            let line = clean_line(&raw);
            if line.starts_with('.') {
                if in_header && is_continuation(&line, 'B', revised) {
                    lines.push(line);
                    continue;
                }
                if line.to_ascii_uppercase().starts_with(".END") {
                    lines.push(".END".to_string());
                    break;
                }
                if is_continuation(&line, 'B', revised) {
                    error!(
                        ".B message at line {} has data between header lines",
                        start_line
                    );
                    lines.push(line);
                    in_header = true;
                    continue;
                }
                // next message began; close this one
                self.unread(raw);
                error!(
                    ".B message at line {} not finished before next message - missing \
                     \".END\" appended",
                    start_line
                );
                lines.push(".END".to_string());
                break;
            }
            in_header = false;
            lines.push(line);
        }
        Ok(MessageRecord {
            kind: MessageKind::B,
            revised,
            text: lines.join("\n"),
            line_number: start_line,
        })
    }
}

fn is_continuation(line: &str, letter: char, revised: bool) -> bool {
    match CONTINUATION.captures(line) {
        Some(caps) => {
            caps[1].to_ascii_uppercase() == letter.to_string()
                && (caps[2].is_empty() || revised)
        }
        None => false,
    }
}

// strip throwaway comments and trailing transmission junk from one line
fn clean_line(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_comment = false;
    let mut in_quote = false;
    for c in raw.chars() {
        if in_comment {
            if c == ':' {
                in_comment = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_quote = !in_quote;
                out.push(c);
            }
            ':' if !in_quote => in_comment = true,
            _ => out.push(c),
        }
    }
    out.truncate(out.trim_end_matches(['=', '&']).len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn records(text: &str) -> Vec<MessageRecord> {
        let mut tok = Tokenizer::new(Cursor::new(text.to_string()));
        let mut out = Vec::new();
        while let Some(rec) = tok.next_message().unwrap() {
            out.push(rec);
        }
        out
    }

    #[test]
    fn test_comment_stripping() {
        assert_eq!(clean_line(".A X 1 : junk"), ".A X 1 ");
        assert_eq!(clean_line(".A X :one: 1 :two: 2"), ".A X  1  2");
        // colons inside retained comments survive
        assert_eq!(
            clean_line(".A X/PC 1.0\"15:OKMN\""),
            ".A X/PC 1.0\"15:OKMN\""
        );
        assert_eq!(clean_line(".E X 1/2/3=="), ".E X 1/2/3");
    }

    #[test]
    fn test_single_messages() {
        let recs = records(".A TNSO2 20240630 Z DH0000/PC 0.00\n");
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].kind, MessageKind::A);
        assert!(!recs[0].revised);
        assert_eq!(recs[0].line_number, 1);

        let recs = records(".ER KEYO2 20251107 Z DH1400/HT/DIH01/1.0/2.0\n");
        assert_eq!(recs[0].kind, MessageKind::E);
        assert!(recs[0].revised);
    }

    #[test]
    fn test_continuations() {
        let recs = records(
            ".E KEYO2 20251107 Z DH1400/HT/DIH01/637.74/637.73\n\
             .E01 638.00/638.01\n\
             .A XYZ 20240101 Z DH12/PC 1.0\n",
        );
        assert_eq!(recs.len(), 2);
        assert_eq!(
            recs[0].text,
            ".E KEYO2 20251107 Z DH1400/HT/DIH01/637.74/637.73\n.E01 638.00/638.01"
        );
        assert_eq!(recs[1].kind, MessageKind::A);
        assert_eq!(recs[1].line_number, 3);
    }

    #[test]
    fn test_revised_continuation_matching() {
        // a .AR message accepts both .A1 and .AR1 continuations
        let recs = records(".AR XYZ 20240101 Z DH12/PC 1.0\n.AR1 /TA 50\n.A2 /TD 40\n");
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].text.lines().count(), 3);
        // but a plain .A message does not accept .AR1
        let recs = records(".A XYZ 20240101 Z DH12/PC 1.0\n.AR1 /TA 50\n");
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1].kind, MessageKind::Unrecognized);
    }

    #[test]
    fn test_b_message_end() {
        let recs = records(
            ".B MSR 20240101 Z DH12/PC/TA\n\
             ALT1 1.0/50\n\
             ALT2 2.0/51\n\
             .END\n",
        );
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].kind, MessageKind::B);
        assert!(recs[0].text.ends_with(".END"));
        assert_eq!(recs[0].text.lines().count(), 4);
    }

    #[test]
    fn test_b_missing_end() {
        // next message starts before .END
        let recs = records(
            ".B MSR 20240101 Z DH12/PC\n\
             ALT1 1.0\n\
             .A XYZ 20240101 Z DH12/PC 1.0\n",
        );
        assert_eq!(recs.len(), 2);
        assert!(recs[0].text.ends_with(".END"));
        assert_eq!(recs[1].kind, MessageKind::A);

        // input exhausted before .END
        let recs = records(".B MSR 20240101 Z DH12/PC\nALT1 1.0\n");
        assert_eq!(recs.len(), 1);
        assert!(recs[0].text.ends_with(".END"));
    }

    #[test]
    fn test_junk_handling() {
        // non-dot junk outside messages is skipped silently
        let recs = records("some free text\n.A XYZ 20240101 Z DH12/PC 1.0\n");
        assert_eq!(recs.len(), 1);
        // dot junk becomes an Unrecognized record
        let recs = records(".X bogus\n");
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].kind, MessageKind::Unrecognized);
    }
}
