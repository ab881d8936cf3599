use once_cell::sync::Lazy;
use regex::Regex;

use remotecc_protocol::{Question, QuestionOption};

/// Selection cursor drawn next to the highlighted menu entry.
pub const CURSOR_GLYPH: char = '❯';

static GREETING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)What would you like[^\n]*\?").unwrap());

/// "  ❯ 2. Run tests" / "1) Yes"
static OPTION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^\s*({CURSOR_GLYPH})?\s*(\d+)[.)]\s+(.+)$")).unwrap()
});

static OPTION_HEAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^({CURSOR_GLYPH})?\s*\d+[.)]")).unwrap());

/// Turn ANSI-stripped terminal text into a question and its menu options.
///
/// `raw_text` always carries the whole cleaned input so callers can show the
/// transcript when nothing structured was found.
pub fn extract(stripped: &str) -> Question {
    let text: String = stripped
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    let question = GREETING
        .find_iter(&text)
        .last()
        .map(|m| m.as_str().trim().to_string())
        .or_else(|| {
            text.lines()
                .rev()
                .find(|line| line.contains('?'))
                .map(|line| line.trim().to_string())
        });

    let lines: Vec<&str> = text.split('\n').collect();
    let mut options = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = OPTION_LINE.captures(line) else {
            continue;
        };
        let Ok(number) = caps[2].parse::<u32>() else {
            continue;
        };
        let description = lines
            .get(i + 1)
            .map(|next| next.trim())
            .filter(|next| !next.is_empty() && !OPTION_HEAD.is_match(next))
            .map(str::to_string);

        options.push(QuestionOption {
            number,
            title: caps[3].trim().to_string(),
            description,
            selected: caps.get(1).is_some(),
        });
    }

    tracing::trace!(
        options = options.len(),
        lines = lines.len(),
        "extracted question"
    );

    Question {
        question,
        options: (!options.is_empty()).then_some(options),
        raw_text: text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_menu_with_description_and_cursor() {
        let q = extract("1. Build feature\n   does the thing\n❯ 2. Run tests\n");
        assert_eq!(
            q.options,
            Some(vec![
                QuestionOption {
                    number: 1,
                    title: "Build feature".to_string(),
                    description: Some("does the thing".to_string()),
                    selected: false,
                },
                QuestionOption {
                    number: 2,
                    title: "Run tests".to_string(),
                    description: None,
                    selected: true,
                },
            ])
        );
    }

    #[test]
    fn glyph_marked_line_is_an_option_not_a_description() {
        let q = extract(&format!("{CURSOR_GLYPH} 1. Yes\n{CURSOR_GLYPH}2) No\n"));
        let options = q.options.expect("options");
        assert_eq!(options.len(), 2);
        assert!(options.iter().all(|o| o.selected));
        assert_eq!(options[0].description, None);
        assert_eq!(options[1].title, "No");
    }

    #[test]
    fn no_numbered_lines_means_null_options() {
        let q = extract("Continue? (y/n)\n");
        assert_eq!(q.options, None);
        assert_eq!(q.question.as_deref(), Some("Continue? (y/n)"));
        assert_eq!(q.raw_text, "Continue? (y/n)\n");
    }

    #[test]
    fn last_question_line_wins() {
        let q = extract("Is this first?\nsome output\n  Is this second?  \n");
        assert_eq!(q.question.as_deref(), Some("Is this second?"));
    }

    #[test]
    fn greeting_is_preferred_over_later_question() {
        let q = extract("What would you like to work on today?\nAny preference?\n");
        assert_eq!(
            q.question.as_deref(),
            Some("What would you like to work on today?")
        );
    }

    #[test]
    fn carriage_returns_are_removed() {
        let q = extract("Do you want to proceed?\r\n❯ 1. Yes\r\n  2. No\r\n");
        assert_eq!(q.question.as_deref(), Some("Do you want to proceed?"));
        assert_eq!(q.raw_text, "Do you want to proceed?\n❯ 1. Yes\n  2. No\n");
        let options = q.options.expect("options");
        assert_eq!(options.len(), 2);
        assert!(options[0].selected);
        assert_eq!(options[0].description, None);
        assert_eq!(options[1].title, "No");
    }

    #[test]
    fn paren_numbering_and_no_question() {
        let q = extract("Pick one\n1) alpha\n2) beta\n");
        assert_eq!(q.question, None);
        let titles: Vec<_> = q
            .options
            .expect("options")
            .into_iter()
            .map(|o| o.title)
            .collect();
        assert_eq!(titles, vec!["alpha", "beta"]);
    }

    #[test]
    fn empty_input() {
        let q = extract("");
        assert_eq!(q.question, None);
        assert_eq!(q.options, None);
        assert_eq!(q.raw_text, "");
    }
}
