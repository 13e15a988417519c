//! Terminal rendering of pull/push reports and body diffs.

use std::collections::HashMap;

use colored::Colorize;

use crate::diff::{line_diff, DiffTag, FieldChange};
use crate::error::ParseError;
use crate::pull::{PullReport, PulledIssue};
use crate::push::PushReport;

/// Rendered lines split by destination stream.
#[derive(Debug, Default)]
pub struct Output {
    pub out: Vec<String>,
    pub err: Vec<String>,
}

impl Output {
    pub fn print(&self) {
        for line in &self.out {
            println!("{line}");
        }
        for line in &self.err {
            eprintln!("{line}");
        }
    }

    fn warnings(&mut self, warnings: &[String], parse_errors: &[ParseError]) {
        for warning in warnings {
            self.err.push(format!("{} {warning}", "Warning:".yellow()));
        }
        for error in parse_errors {
            self.err.push(format!(
                "{} {}: {}",
                "Parse error:".red(),
                error.path,
                error.message
            ));
        }
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

fn or_none(value: &str) -> String {
    if value.is_empty() {
        "(none)".dimmed().to_string()
    } else {
        value.to_string()
    }
}

/// `rrggbb` to an RGB triple.
fn parse_hex(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

/// Label name drawn in its remote color when known.
fn label_chip(name: &str, colors: &HashMap<String, String>) -> String {
    match colors.get(&name.to_lowercase()).and_then(|c| parse_hex(c)) {
        Some((r, g, b)) => name.truecolor(r, g, b).to_string(),
        None => name.to_string(),
    }
}

/// One line per field difference.
pub fn field_change(change: &FieldChange) -> String {
    field_change_with_colors(change, &HashMap::new())
}

fn field_change_with_colors(change: &FieldChange, label_colors: &HashMap<String, String>) -> String {
    match change {
        FieldChange::Scalar { field, old, new } => format!(
            "{field}: {} -> {}",
            or_none(old).red(),
            or_none(new).green()
        ),
        FieldChange::Set {
            field,
            added,
            removed,
        } if *field == "labels" && !label_colors.is_empty() => {
            let mut parts: Vec<String> = added
                .iter()
                .map(|a| format!("{}{}", "+".green(), label_chip(a, label_colors)))
                .collect();
            parts.extend(
                removed
                    .iter()
                    .map(|r| format!("{}{}", "-".red(), label_chip(r, label_colors))),
            );
            format!("{field}: {}", parts.join(" "))
        }
        FieldChange::Set {
            field,
            added,
            removed,
        } => {
            let mut parts: Vec<String> = added
                .iter()
                .map(|a| format!("+{a}").green().to_string())
                .collect();
            parts.extend(removed.iter().map(|r| format!("-{r}").red().to_string()));
            format!("{field}: {}", parts.join(" "))
        }
        FieldChange::Body { inserted, deleted } => format!(
            "body: {} {}",
            format!("+{inserted}").green(),
            format!("-{deleted}").red()
        ),
    }
}

fn issue_line(tag: colored::ColoredString, issue: &PulledIssue) -> String {
    format!(
        "{tag} {} {} {}",
        format!("#{}", issue.number).cyan(),
        issue.title,
        issue.path.dimmed()
    )
}

pub fn pull_report(report: &PullReport) -> Output {
    let mut output = Output::default();
    for issue in &report.added {
        output.out.push(issue_line("A".green().bold(), issue));
    }
    for updated in &report.updated {
        output.out.push(issue_line("U".blue().bold(), &updated.issue));
        for change in &updated.changes {
            output.out.push(format!(
                "    {}",
                field_change_with_colors(change, &report.label_colors)
            ));
        }
        if let Some(from) = &updated.renamed_from {
            output
                .out
                .push(format!("    file: {} -> {}", from.dimmed(), updated.issue.path));
        }
    }
    for issue in &report.restored {
        output.out.push(issue_line("R".yellow().bold(), issue));
    }

    if !report.conflicts.is_empty() {
        let list: Vec<String> = report
            .conflicts
            .iter()
            .map(|c| format!("#{} ({})", c.number, c.kind))
            .collect();
        output.err.push(format!(
            "{} {}",
            "Conflicts (local changes, skipped):".yellow(),
            list.join(", ")
        ));
    }
    output.warnings(&report.warnings, &report.parse_errors);

    if report.unchanged > 0 {
        output.out.push(
            format!(
                "Nothing to pull: {} up to date",
                plural(report.unchanged, "issue")
            )
            .dimmed()
            .to_string(),
        );
    }
    if !report.wrote_anything() && report.unchanged == 0 && report.conflicts.is_empty() {
        output.out.push("Nothing to pull".dimmed().to_string());
    }
    if report.local_changes > 0 {
        output.out.push(
            format!(
                "{} with local changes not yet pushed",
                plural(report.local_changes, "issue")
            )
            .dimmed()
            .to_string(),
        );
    }
    output
}

pub fn push_report(report: &PushReport) -> Output {
    let mut output = Output::default();

    if !report.planned.is_empty() {
        output
            .out
            .push("Dry run - pending changes to push".bold().to_string());
        for planned in &report.planned {
            let tag = if planned.create { "create".green() } else { "update".blue() };
            output.out.push(format!(
                "  {tag} {} {}",
                format!("#{}", planned.number).cyan(),
                planned.title
            ));
            for change in &planned.changes {
                output.out.push(format!("      {}", field_change(change)));
            }
            if planned.comment {
                output.out.push(format!("      {}", "+ comment".green()));
            }
        }
        output
            .out
            .push("Run without --dry-run to apply changes".dimmed().to_string());
    }

    for label in &report.labels_created {
        output.out.push(format!("{} label {label}", "+".green()));
    }
    for created in &report.created {
        output.out.push(format!(
            "{} {} -> {} {}",
            "Created".green(),
            created.temporary.to_string().dimmed(),
            format!("#{}", created.number).cyan(),
            created.title
        ));
    }
    for path in &report.remapped {
        output
            .out
            .push(format!("{} {}", "Remapped".dimmed(), path.dimmed()));
    }
    for updated in &report.updated {
        output.out.push(format!(
            "{} {} {}",
            "Updated".blue(),
            format!("#{}", updated.number).cyan(),
            updated.title
        ));
        for change in &updated.changes {
            output.out.push(format!("    {}", field_change(change)));
        }
    }
    for number in &report.comments {
        output.out.push(format!(
            "{} on {}",
            "Commented".green(),
            format!("#{number}").cyan()
        ));
    }
    for failure in &report.failures {
        output.err.push(format!(
            "{} #{}: {}",
            "Failed".red().bold(),
            failure.number,
            failure.message
        ));
    }
    output.warnings(&report.warnings, &report.parse_errors);

    if report.is_empty() {
        output.out.push("Nothing to push".dimmed().to_string());
    }
    output
}

/// Unified line diff of two texts, without hunk headers.
pub fn unified_diff(old: &str, new: &str, old_label: &str, new_label: &str) -> Vec<String> {
    let mut lines = vec![
        format!("--- {old_label}").dimmed().to_string(),
        format!("+++ {new_label}").dimmed().to_string(),
    ];
    for op in line_diff(old, new) {
        lines.push(match op.tag {
            DiffTag::Equal => format!(" {}", op.text),
            DiffTag::Delete => format!("{}{}", "-".red(), op.text.red()),
            DiffTag::Insert => format!("{}{}", "+".green(), op.text.green()),
        });
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictKind;
    use crate::pull::Conflict;
    use crate::types::issue::IssueNumber;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_pull_report_lines() {
        plain();
        let report = PullReport {
            added: vec![PulledIssue {
                number: IssueNumber::from("7"),
                title: "Crash".to_string(),
                path: "open/7-crash.md".to_string(),
            }],
            conflicts: vec![Conflict {
                number: IssueNumber::from("3"),
                kind: ConflictKind::NoBaseline,
                path: "open/3-x.md".to_string(),
            }],
            unchanged: 1,
            ..Default::default()
        };
        let output = pull_report(&report);
        assert_eq!(output.out[0], "A #7 Crash open/7-crash.md");
        assert_eq!(output.out[1], "Nothing to pull: 1 issue up to date");
        assert_eq!(
            output.err,
            vec!["Conflicts (local changes, skipped): #3 (no-baseline)".to_string()]
        );
    }

    #[test]
    fn test_field_change_formats() {
        plain();
        let scalar = FieldChange::Scalar {
            field: "milestone",
            old: String::new(),
            new: "v1".to_string(),
        };
        assert_eq!(field_change(&scalar), "milestone: (none) -> v1");
        let set = FieldChange::Set {
            field: "labels",
            added: vec!["bug".to_string()],
            removed: vec!["ui".to_string()],
        };
        assert_eq!(field_change(&set), "labels: +bug -ui");
        let body = FieldChange::Body {
            inserted: 2,
            deleted: 1,
        };
        assert_eq!(field_change(&body), "body: +2 -1");
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("d73a4a"), Some((0xd7, 0x3a, 0x4a)));
        assert_eq!(parse_hex("#FFFFFF"), Some((255, 255, 255)));
        assert_eq!(parse_hex("fff"), None);
        assert_eq!(parse_hex("zzzzzz"), None);
    }

    #[test]
    fn test_unified_diff() {
        plain();
        let lines = unified_diff("a\nb\n", "a\nc\n", "original", "local");
        assert_eq!(lines, vec!["--- original", "+++ local", " a", "-b", "+c"]);
    }

    #[test]
    fn test_empty_push_report() {
        plain();
        let output = push_report(&PushReport::default());
        assert_eq!(output.out, vec!["Nothing to push".to_string()]);
    }
}
