//! The automation trigger table.
//!
//! A prioritized list of (predicate over the visible window → action) pairs,
//! evaluated on every buffer change; the first match wins for that update.
//! Detection is substring-based over rendered text, not a structured
//! protocol, so the table is plain data: when the driven CLI's wording
//! changes, the table changes, not the driver's control flow.

/// What the driver sees when the table is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext<'a> {
    /// Text of the visible window, lines joined with `\n`.
    pub window: &'a str,
    /// Whether the task prompt has already been injected this run.
    pub prompt_injected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    /// Accept the highlighted option.
    SendEnter,
    /// Cycle to the "don't ask again" option.
    SendShiftTab,
    /// Type the task prompt, settle, then submit it.
    InjectPrompt,
    /// Tool is idle after the prompt ran; wind the session down.
    SendEndOfInput,
    /// Still working; touch nothing.
    Wait,
}

pub struct Trigger {
    pub name: &'static str,
    pub predicate: fn(&TriggerContext<'_>) -> bool,
    pub action: TriggerAction,
}

/// First matching trigger for this window, if any.
pub fn evaluate<'t>(table: &'t [Trigger], ctx: &TriggerContext<'_>) -> Option<&'t Trigger> {
    table.iter().find(|trigger| (trigger.predicate)(ctx))
}

/// The table for the stock CLI coding tool, in priority order.
pub fn default_trigger_table() -> Vec<Trigger> {
    vec![
        Trigger {
            name: "trust-folder-confirm",
            predicate: trust_confirm,
            action: TriggerAction::SendEnter,
        },
        Trigger {
            name: "dont-ask-again",
            predicate: dont_ask_again,
            action: TriggerAction::SendShiftTab,
        },
        Trigger {
            name: "empty-prompt",
            predicate: empty_prompt,
            action: TriggerAction::InjectPrompt,
        },
        Trigger {
            name: "idle-after-prompt",
            predicate: idle_after_prompt,
            action: TriggerAction::SendEndOfInput,
        },
        Trigger {
            name: "processing",
            predicate: processing,
            action: TriggerAction::Wait,
        },
    ]
}

fn trust_confirm(ctx: &TriggerContext<'_>) -> bool {
    let lower = ctx.window.to_ascii_lowercase();
    lower.contains("do you trust the files in this folder") && lower.contains("confirm")
}

fn dont_ask_again(ctx: &TriggerContext<'_>) -> bool {
    ctx.window
        .to_ascii_lowercase()
        .contains("don't ask again this session")
}

fn empty_prompt(ctx: &TriggerContext<'_>) -> bool {
    !ctx.prompt_injected && has_prompt_marker(ctx.window)
}

fn idle_after_prompt(ctx: &TriggerContext<'_>) -> bool {
    ctx.prompt_injected && has_prompt_marker(ctx.window) && !has_try_hint(ctx.window)
}

fn processing(ctx: &TriggerContext<'_>) -> bool {
    ctx.window.to_ascii_lowercase().contains("esc to interrupt")
}

/// A line presenting the tool's input box: `>` first on the line, allowing
/// for box-drawing borders.
pub fn has_prompt_marker(window: &str) -> bool {
    window.lines().any(is_prompt_marker_line)
}

fn is_prompt_marker_line(line: &str) -> bool {
    let body = line.trim_start_matches(['│', '┃', '║', ' ']);
    body == ">" || body.starts_with("> ")
}

fn has_try_hint(window: &str) -> bool {
    window.to_ascii_lowercase().contains("try \"")
}

/// Secondary "looks done" observation: completion-flavored words in the
/// last five lines together with an idle prompt. Advisory only — the
/// trigger table is the authoritative completion signal.
pub fn completion_hint(window: &str) -> bool {
    let lines: Vec<&str> = window.lines().collect();
    let start = lines.len().saturating_sub(5);
    let tail = &lines[start..];

    let keyword = tail.iter().any(|line| {
        let lower = line.to_ascii_lowercase();
        ["done", "finished", "completed", "complete"]
            .iter()
            .any(|word| lower.contains(word))
    });
    let idle = tail.iter().any(|line| {
        let trimmed = line.trim_end();
        trimmed.ends_with('$') || trimmed.ends_with("$ ") || is_prompt_marker_line(line)
    });
    keyword && idle
}
