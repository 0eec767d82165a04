//! Error text reported across the run boundary.

use std::fmt;

use scriptbox_lang::Exception;

/// A runtime exception tied back to the script source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: String,
    pub message: String,
    /// 1-based line in the main script, when known.
    pub line: Option<usize>,
    pub line_text: Option<String>,
}

impl Diagnostic {
    pub fn from_exception(exc: &Exception, script: &str) -> Self {
        let line_text = exc.line.and_then(|n| source_line(script, n)).map(str::to_string);
        Self {
            kind: exc.kind.as_str().to_string(),
            message: exc.message.clone(),
            line: exc.line,
            line_text,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(n) = self.line {
            write!(f, "\ncaused by line {}: {}", n, self.line_text.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }
}

/// Line `n` (1-based) of `script`, without its line terminator.
pub fn source_line(script: &str, n: usize) -> Option<&str> {
    if n == 0 {
        return None;
    }
    script
        .split('\n')
        .nth(n - 1)
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptbox_lang::ExcKind;

    #[test]
    fn runtime_errors_quote_the_offending_line() {
        let script = "a = 1\nb = 2\nresult = 1/0\nc = 3\nd = 4\n";
        let exc = Exception::new(ExcKind::ZeroDivisionError, "division by zero").at_line(3);
        let d = Diagnostic::from_exception(&exc, script);
        assert_eq!(
            d.to_string(),
            "ZeroDivisionError: division by zero\ncaused by line 3: result = 1/0"
        );
    }

    #[test]
    fn unattributed_errors_have_no_location() {
        let exc = Exception::new(ExcKind::ImportDenied, "'os' is not configured as a supported import module");
        let d = Diagnostic::from_exception(&exc, "import os\n");
        assert_eq!(
            d.to_string(),
            "ImportDenied: 'os' is not configured as a supported import module"
        );
    }

    #[test]
    fn source_line_handles_crlf_and_bounds() {
        assert_eq!(source_line("x\r\ny\r\n", 2), Some("y"));
        assert_eq!(source_line("x", 0), None);
        assert_eq!(source_line("x", 5), None);
    }
}
