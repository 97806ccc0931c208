//! Per-family renderers.
//!
//! Every renderer reads the payload through [`Payload`], so a missing or
//! wrongly-typed field becomes [`UNKNOWN`] (or is left out) instead of an
//! error.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{Color, Notification, UNKNOWN};
use crate::webhooks::{FormatterId, Payload};

/// Longest pull request body quoted in a notification.
const PR_BODY_PREVIEW: usize = 200;

/// Longest release notes excerpt quoted in a notification.
const RELEASE_NOTES_PREVIEW: usize = 300;

pub fn render(formatter: FormatterId, event_type: &str, payload: &Value) -> Notification {
    let p = Payload::new(payload);
    match formatter {
        FormatterId::Push => push(p),
        FormatterId::PullRequest => pull_request(p),
        FormatterId::PullRequestMerged => pull_request_merged(p),
        FormatterId::Issue => issue(p),
        FormatterId::Release => release(p),
        FormatterId::Deployment => deployment(p),
        FormatterId::WorkflowRun => ci(p, CiKind::WorkflowRun),
        FormatterId::WorkflowJob => ci(p, CiKind::WorkflowJob),
        FormatterId::CheckRun => ci(p, CiKind::CheckRun),
        FormatterId::CheckSuite => ci(p, CiKind::CheckSuite),
        FormatterId::Wiki => wiki(p),
        FormatterId::Generic => generic(event_type, p),
    }
}

// ─── Source control ───

fn push(p: Payload<'_>) -> Notification {
    let repo = p.str_or(&["repository", "full_name"], UNKNOWN);
    let repo_url = p.str_or(&["repository", "html_url"], "");
    let pusher = p.str_or(&["pusher", "name"], UNKNOWN);
    let branch = p
        .str(&["ref"])
        .map(|r| r.strip_prefix("refs/heads/").unwrap_or(r))
        .unwrap_or(UNKNOWN);
    let commits = p.array(&["commits"]);
    let plural = if commits.len() == 1 { "" } else { "s" };

    let mut note = Notification::new(
        format!("📝 {} commit{plural} pushed to {branch}", commits.len()),
        Color::Blue,
    )
    .field("Repository", linked(repo, repo_url), true)
    .field("Pusher", pusher, true)
    .field("Branch", branch, true);
    if !repo_url.is_empty() {
        note = note.link(format!("{repo_url}/commits/{branch}"));
    }

    commits.iter().fold(note, |note, commit| {
        let c = Payload::new(commit);
        let sha = short_sha(c.str_or(&["id"], ""));
        let author = c.str_or(&["author", "name"], UNKNOWN);
        let message = c
            .str(&["message"])
            .and_then(|m| m.lines().next())
            .unwrap_or("No message");
        let value = match c.str(&["url"]) {
            Some(url) => format!("[{message}]({url})"),
            None => message.to_string(),
        };
        note.field(format!("`{sha}` {author}"), value, false)
    })
}

fn pull_request(p: Payload<'_>) -> Notification {
    let action = p.str_or(&["action"], UNKNOWN);
    let number = number_or_unknown(p.u64(&["pull_request", "number"]));
    let title = p.str_or(&["pull_request", "title"], "No title");

    let (icon, color) = match action {
        "opened" => ("🔓", Color::Green),
        "closed" => ("🔒", Color::Red),
        "reopened" => ("🔄", Color::Orange),
        "ready_for_review" => ("👀", Color::Blue),
        "converted_to_draft" => ("📝", Color::Grey),
        _ => ("📋", Color::Blue),
    };

    let mut note = Notification::new(format!("{icon} Pull Request #{number}: {title}"), color)
        .link(p.str_or(&["pull_request", "html_url"], ""))
        .field("Repository", p.str_or(&["repository", "full_name"], UNKNOWN), true)
        .field("Author", p.str_or(&["pull_request", "user", "login"], UNKNOWN), true)
        .field("Action", title_case(action), true);

    if let Some(body) = p.str(&["pull_request", "body"]) {
        note = note.field("Description", super::truncate(body, PR_BODY_PREVIEW), false);
    }
    note
}

fn pull_request_merged(p: Payload<'_>) -> Notification {
    let number = number_or_unknown(p.u64(&["pull_request", "number"]));
    let title = p.str_or(&["pull_request", "title"], "No title");

    Notification::new(
        format!("🎉 Pull Request #{number} Merged: {title}"),
        Color::Green,
    )
    .link(p.str_or(&["pull_request", "html_url"], ""))
    .field("Repository", p.str_or(&["repository", "full_name"], UNKNOWN), true)
    .field("Author", p.str_or(&["pull_request", "user", "login"], UNKNOWN), true)
    .field(
        "Merged by",
        p.str_or(&["pull_request", "merged_by", "login"], UNKNOWN),
        true,
    )
    .field(
        "Into",
        p.str_or(&["pull_request", "base", "ref"], UNKNOWN),
        true,
    )
}

fn issue(p: Payload<'_>) -> Notification {
    let action = p.str_or(&["action"], UNKNOWN);
    let number = number_or_unknown(p.u64(&["issue", "number"]));
    let title = p.str_or(&["issue", "title"], "No title");

    let (icon, color) = match action {
        "opened" => ("🐛", Color::Green),
        "closed" => ("✅", Color::Red),
        "reopened" => ("🔄", Color::Orange),
        "assigned" => ("👤", Color::Blue),
        "unassigned" => ("👥", Color::Grey),
        _ => ("📋", Color::Blue),
    };

    Notification::new(format!("{icon} Issue #{number}: {title}"), color)
        .link(p.str_or(&["issue", "html_url"], ""))
        .field("Repository", p.str_or(&["repository", "full_name"], UNKNOWN), true)
        .field("Author", p.str_or(&["issue", "user", "login"], UNKNOWN), true)
        .field("Action", title_case(action), true)
}

fn release(p: Payload<'_>) -> Notification {
    let action = p.str_or(&["action"], UNKNOWN);
    let tag = p.str_or(&["release", "tag_name"], UNKNOWN);
    let name = p.str_or(&["release", "name"], tag);

    let mut note = Notification::new(format!("🚀 Release {action}: {name}"), Color::Gold)
        .link(p.str_or(&["release", "html_url"], ""))
        .field("Repository", p.str_or(&["repository", "full_name"], UNKNOWN), true)
        .field("Tag", tag, true)
        .field("Author", p.str_or(&["release", "author", "login"], UNKNOWN), true);

    if let Some(body) = p.str(&["release", "body"]) {
        note = note.field(
            "Release Notes",
            super::truncate(body, RELEASE_NOTES_PREVIEW),
            false,
        );
    }
    note
}

fn deployment(p: Payload<'_>) -> Notification {
    let environment = p.str_or(&["deployment", "environment"], UNKNOWN);
    let state = p.str_or(&["deployment_status", "state"], UNKNOWN);

    let (icon, color) = match state {
        "success" => ("✅", Color::Green),
        "failure" => ("❌", Color::Red),
        "error" => ("🚨", Color::Red),
        "pending" | "queued" | "in_progress" => ("⏳", Color::Orange),
        _ => ("🚀", Color::Blue),
    };

    Notification::new(format!("{icon} Deployment to {environment}: {state}"), color)
        .link(p.str_or(&["deployment_status", "target_url"], ""))
        .field("Repository", p.str_or(&["repository", "full_name"], UNKNOWN), true)
        .field("Environment", environment, true)
        .field("Status", title_case(state), true)
}

// ─── CI ───

#[derive(Debug, Clone, Copy)]
enum CiKind {
    WorkflowRun,
    WorkflowJob,
    CheckRun,
    CheckSuite,
}

impl CiKind {
    fn object(self) -> &'static str {
        match self {
            CiKind::WorkflowRun => "workflow_run",
            CiKind::WorkflowJob => "workflow_job",
            CiKind::CheckRun => "check_run",
            CiKind::CheckSuite => "check_suite",
        }
    }

    fn label(self) -> &'static str {
        match self {
            CiKind::WorkflowRun => "Workflow Run",
            CiKind::WorkflowJob => "Workflow Job",
            CiKind::CheckRun => "Check Run",
            CiKind::CheckSuite => "Check Suite",
        }
    }

    /// Field names holding the start and end timestamps.
    fn timestamps(self) -> (&'static str, &'static str) {
        match self {
            CiKind::WorkflowRun => ("run_started_at", "updated_at"),
            CiKind::WorkflowJob | CiKind::CheckRun => ("started_at", "completed_at"),
            CiKind::CheckSuite => ("created_at", "updated_at"),
        }
    }
}

fn ci(p: Payload<'_>, kind: CiKind) -> Notification {
    let obj = kind.object();
    let status = p.str_or(&[obj, "status"], UNKNOWN);
    let conclusion = p.str(&[obj, "conclusion"]);
    let sha = short_sha(p.str_or(&[obj, "head_sha"], ""));
    let repo = p.str_or(&["repository", "full_name"], UNKNOWN);
    let repo_url = p.str_or(&["repository", "html_url"], "");

    let name = match kind {
        CiKind::CheckSuite => p.str_or(&[obj, "app", "name"], UNKNOWN),
        _ => p.str_or(&[obj, "name"], UNKNOWN),
    };
    let branch = match kind {
        CiKind::CheckRun => p.str(&[obj, "check_suite", "head_branch"]),
        _ => p.str(&[obj, "head_branch"]),
    }
    .unwrap_or(UNKNOWN);
    let url = match kind {
        CiKind::CheckRun => p
            .str(&[obj, "details_url"])
            .or_else(|| p.str(&[obj, "html_url"]))
            .map(str::to_string),
        CiKind::CheckSuite if !repo_url.is_empty() && !sha.is_empty() => {
            Some(format!("{repo_url}/commits/{sha}/checks"))
        }
        _ => p.str(&[obj, "html_url"]).map(str::to_string),
    };

    let (start, end) = kind.timestamps();
    let duration = duration(p.str(&[obj, start]), p.str(&[obj, end]));
    let status_display = match conclusion {
        Some(conclusion) => title_case(conclusion),
        None => title_case(status),
    };

    let mut note = Notification::new(
        format!("{} {}: {name}", status_icon(status, conclusion), kind.label()),
        status_color(status, conclusion),
    )
    .link(url.unwrap_or_default())
    .field("Repository", linked(repo, repo_url), true)
    .field("Branch", branch, true)
    .field("Commit", format!("`{}`", non_empty_or_unknown(&sha)), true)
    .field("Status", status_display, true)
    .field("Duration", duration, true);

    let id = number_or_unknown(p.u64(&[obj, "id"]));
    note = match kind {
        CiKind::WorkflowRun => note.field("Run ID", format!("#{id}"), true),
        CiKind::WorkflowJob => note.field("Job ID", format!("#{id}"), true).field(
            "Run ID",
            format!("#{}", number_or_unknown(p.u64(&[obj, "run_id"]))),
            true,
        ),
        CiKind::CheckRun => note.field("Check ID", format!("#{id}"), true),
        CiKind::CheckSuite => note.field("Suite ID", format!("#{id}"), true),
    };
    note
}

/// Color for a CI status, with the conclusion taking precedence.
pub fn status_color(status: &str, conclusion: Option<&str>) -> Color {
    match (conclusion, status) {
        (Some("success"), _) => Color::Green,
        (Some("failure"), _) => Color::Red,
        (Some("cancelled"), _) => Color::Grey,
        (Some(_), _) => Color::Orange,
        (None, "completed") => Color::Green,
        (None, "queued" | "in_progress") => Color::Orange,
        (None, "cancelled") => Color::Grey,
        (None, _) => Color::Blue,
    }
}

fn status_icon(status: &str, conclusion: Option<&str>) -> &'static str {
    match (conclusion, status) {
        (Some("success"), _) => "✅",
        (Some("failure"), _) => "❌",
        (Some("cancelled"), _) => "🚫",
        (Some(_), _) => "⚠️",
        (None, "completed") => "✅",
        (None, "queued") => "⏳",
        (None, "in_progress") => "🔄",
        (None, "cancelled") => "🚫",
        (None, _) => "❓",
    }
}

/// Formats the time between two RFC 3339 timestamps as `"Xm Ys"` or `"Ys"`.
///
/// Missing, unparseable or negative spans render as `"N/A"`.
pub fn duration(started_at: Option<&str>, completed_at: Option<&str>) -> String {
    let parse = |s: &str| DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc));
    let (Some(start), Some(end)) = (started_at, completed_at) else {
        return "N/A".to_string();
    };
    let (Ok(start), Ok(end)) = (parse(start), parse(end)) else {
        return "N/A".to_string();
    };

    let seconds = (end - start).num_seconds();
    if seconds < 0 {
        return "N/A".to_string();
    }
    match (seconds / 60, seconds % 60) {
        (0, s) => format!("{s}s"),
        (m, s) => format!("{m}m {s}s"),
    }
}

// ─── Wiki and fallback ───

fn wiki(p: Payload<'_>) -> Notification {
    let pages = p.array(&["pages"]);
    let note = Notification::new("📚 Wiki Updated", Color::Blue)
        .field("Repository", p.str_or(&["repository", "full_name"], UNKNOWN), true)
        .field("Updated by", p.str_or(&["sender", "login"], UNKNOWN), true);

    pages.iter().fold(note, |note, page| {
        let page = Payload::new(page);
        let title = page.str_or(&["title"], UNKNOWN);
        let action = page.str_or(&["action"], "edited");
        let value = match page.str(&["html_url"]) {
            Some(url) => format!("[{action}]({url})"),
            None => action.to_string(),
        };
        note.field(title, value, false)
    })
}

fn generic(event_type: &str, p: Payload<'_>) -> Notification {
    let event_label = if event_type.is_empty() {
        UNKNOWN
    } else {
        event_type
    };

    let mut note = Notification::new(
        format!("🔍 {} Event", title_case(event_label)),
        Color::Grey,
    )
    .field("Repository", p.str_or(&["repository", "full_name"], UNKNOWN), true)
    .field("Sender", p.str_or(&["sender", "login"], UNKNOWN), true);

    if let Some(action) = p.action() {
        note = note.field("Action", title_case(action), true);
    }
    note.field("Event Type", event_label, false)
}

// ─── Helpers ───

fn short_sha(sha: &str) -> String {
    sha.chars().take(7).collect()
}

fn linked(text: &str, url: &str) -> String {
    if url.is_empty() {
        text.to_string()
    } else {
        format!("[{text}]({url})")
    }
}

fn number_or_unknown(n: Option<u64>) -> String {
    n.map_or_else(|| UNKNOWN.to_string(), |n| n.to_string())
}

fn non_empty_or_unknown(s: &str) -> &str {
    if s.is_empty() { UNKNOWN } else { s }
}

/// `"ready_for_review"` → `"Ready For Review"`.
fn title_case(s: &str) -> String {
    s.split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
