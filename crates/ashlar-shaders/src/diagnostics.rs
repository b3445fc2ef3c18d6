//! Compiler diagnostics.
//!
//! shaderc reports problems as text, one per line, in the form
//! `name.frag:12: error: message`. [`parse_messages`] turns that into
//! [`Diagnostic`] records that are handed to the caller's callback.

use std::fmt;

/// Compilation phase a diagnostic was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticPhase {
    Preprocess,
    Parse,
    Link,
}

impl fmt::Display for DiagnosticPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Preprocess => "preprocessing",
            Self::Parse => "parsing",
            Self::Link => "linking",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Warning,
    Error,
}

/// One compiler message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub phase: DiagnosticPhase,
    pub severity: Severity,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "[{}] {file}:{line}: {severity}: {}", self.phase, self.message),
            (Some(file), None) => write!(f, "[{}] {file}: {severity}: {}", self.phase, self.message),
            _ => write!(f, "[{}] {severity}: {}", self.phase, self.message),
        }
    }
}

const TAGS: [(&str, Severity); 2] = [(": error: ", Severity::Error), (": warning: ", Severity::Warning)];

fn is_summary(line: &str) -> bool {
    line.ends_with("generated.")
}

fn split_location(location: &str) -> (Option<String>, Option<u32>) {
    match location.rsplit_once(':') {
        Some((file, line)) => match line.trim().parse() {
            Ok(line) => (Some(file.to_string()), Some(line)),
            Err(_) => (Some(location.to_string()), None),
        },
        None if location.is_empty() => (None, None),
        None => (Some(location.to_string()), None),
    }
}

/// Parse compiler output raised during `phase`.
///
/// Messages about linking are always reported in [`DiagnosticPhase::Link`].
/// Lines without a severity tag continue the previous message.
pub fn parse_messages(phase: DiagnosticPhase, text: &str) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();

    for line in text.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()) {
        if is_summary(line) {
            continue;
        }

        let tagged = TAGS
            .iter()
            .find_map(|&(tag, severity)| line.find(tag).map(|at| (at, tag, severity)));

        match tagged {
            Some((at, tag, severity)) => {
                let (file, line_number) = split_location(&line[..at]);
                let message = line[at + tag.len()..].trim().to_string();
                let phase = if message.contains("Linking") {
                    DiagnosticPhase::Link
                } else {
                    phase
                };
                diagnostics.push(Diagnostic {
                    phase,
                    severity,
                    file,
                    line: line_number,
                    message,
                });
            }
            None => match diagnostics.last_mut() {
                Some(previous) => {
                    previous.message.push('\n');
                    previous.message.push_str(line.trim());
                }
                None => diagnostics.push(Diagnostic {
                    phase,
                    severity: Severity::Error,
                    file: None,
                    line: None,
                    message: line.trim().to_string(),
                }),
            },
        }
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn located_errors_are_parsed() {
        let text = "blur.frag:5: error: 'colour' : undeclared identifier\n\
                    blur.frag:5: error: '' : compilation terminated\n\
                    2 errors generated.\n";
        let diagnostics = parse_messages(DiagnosticPhase::Parse, text);
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].file.as_deref(), Some("blur.frag"));
        assert_eq!(diagnostics[0].line, Some(5));
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert_eq!(diagnostics[0].message, "'colour' : undeclared identifier");
    }

    #[test]
    fn warnings_keep_their_severity() {
        let text = "a.vert:3: warning: '#extension' : extension not supported: GL_FOO\n";
        let diagnostics = parse_messages(DiagnosticPhase::Preprocess, text);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
        assert_eq!(diagnostics[0].phase, DiagnosticPhase::Preprocess);
    }

    #[test]
    fn linking_messages_are_link_phase() {
        let text = "a.frag: error: Linking fragment stage: Missing entry point: Each stage requires one entry point\n";
        let diagnostics = parse_messages(DiagnosticPhase::Parse, text);
        assert_eq!(diagnostics[0].phase, DiagnosticPhase::Link);
        assert_eq!(diagnostics[0].file.as_deref(), Some("a.frag"));
        assert_eq!(diagnostics[0].line, None);
    }

    #[test]
    fn untagged_lines_continue_previous_message() {
        let text = "a.frag:1: error: first\n  more detail\n";
        let diagnostics = parse_messages(DiagnosticPhase::Parse, text);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "first\nmore detail");

        let orphan = parse_messages(DiagnosticPhase::Parse, "internal failure\n");
        assert_eq!(orphan[0].severity, Severity::Error);
        assert_eq!(orphan[0].file, None);
    }

    #[test]
    fn display_includes_phase_and_location() {
        let d = &parse_messages(DiagnosticPhase::Parse, "x.comp:7: error: bad")[0];
        assert_eq!(d.to_string(), "[parsing] x.comp:7: error: bad");
    }
}
