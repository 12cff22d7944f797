use crate::model::OptionSet;

/// Help table for a module: title, underline, column header, then one row per option.
///
/// The first cell of every option row carries exactly two leading spaces so the
/// block lines up under the column header when rendered.
pub fn help_rows(prompt: &str, options: &OptionSet) -> Vec<Vec<String>> {
    let mut rows = vec![
        vec![format!("Options {prompt}"), String::new(), String::new()],
        vec![format!("========{}", "=".repeat(prompt.len())), String::new(), String::new()],
        vec!["  Option".into(), "Syntax".into(), "Description".into()],
        vec!["  -------".into(), "------".into(), "-----------".into()],
    ];
    rows.extend(options.iter().map(|o| {
        vec![
            format!("  {}", o.name.trim_start()),
            o.kind.syntax().to_string(),
            o.description.to_string(),
        ]
    }));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_underline_matches_title_length() {
        let opts = OptionSet::new().add_int("THREADS", 20, false, "Workers");
        let rows = help_rows("dnsbrute", &opts);

        assert_eq!(rows[0][0], "Options dnsbrute");
        assert_eq!(rows[1][0].len(), rows[0][0].len());
        assert_eq!(rows[4], vec!["  THREADS", "<int>", "Workers"]);
    }
}
