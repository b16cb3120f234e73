//! LaTeX math rendering via pulldown-latex → MathML

use pulldown_latex::{
    Parser, Storage, config::DisplayMode, config::RenderConfig, mathml::push_mathml,
};

/// Result of attempting to render LaTeX math
#[derive(Debug)]
pub enum MathResult {
    /// Successfully rendered MathML
    Success(String),
    /// The source didn't parse. Callers render nothing for it.
    Error { message: String },
}

/// Render LaTeX math to MathML
///
/// `latex` comes without its `$`/`$$` delimiters.
pub fn render_math(latex: &str, display_mode: bool) -> MathResult {
    let storage = Storage::new();
    let parser = Parser::new(latex, &storage);
    let config = RenderConfig {
        display_mode: if display_mode {
            DisplayMode::Block
        } else {
            DisplayMode::Inline
        },
        ..Default::default()
    };

    let events: Vec<_> = parser.collect();
    let errors: Vec<String> = events
        .iter()
        .filter_map(|e| e.as_ref().err().map(|err| err.to_string()))
        .collect();
    if !errors.is_empty() {
        return MathResult::Error {
            message: errors.join("; "),
        };
    }

    let mut mathml = String::new();
    match push_mathml(&mut mathml, events.into_iter(), config) {
        Ok(()) => MathResult::Success(mathml),
        Err(e) => MathResult::Error {
            message: e.to_string(),
        },
    }
}

/// MathML wrapped for placement, or an empty string when the source is invalid.
pub fn render_or_nothing(latex: &str, display_mode: bool) -> String {
    match render_math(latex, display_mode) {
        MathResult::Success(mathml) if display_mode => {
            format!(r#"<div class="math math-display">{mathml}</div>"#)
        }
        MathResult::Success(mathml) => format!(r#"<span class="math math-inline">{mathml}</span>"#),
        MathResult::Error { message } => {
            tracing::debug!(%message, "dropping invalid math");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_inline_math() {
        let result = render_math("x^2", false);
        let MathResult::Success(mathml) = result else {
            panic!("expected MathML, got {result:?}");
        };
        assert!(mathml.contains("<math"));
        assert!(mathml.contains("</math>"));
    }

    #[test]
    fn renders_display_math() {
        let html = render_or_nothing(r"\frac{a}{b}", true);
        assert!(html.starts_with(r#"<div class="math math-display">"#));
        assert!(html.contains("<mfrac"));
    }

    #[test]
    fn invalid_latex_renders_nothing() {
        assert!(matches!(render_math(r"\frac{a", false), MathResult::Error { .. }));
        assert_eq!(render_or_nothing(r"\frac{a", false), "");
    }
}
