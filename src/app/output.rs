//! Terminal rendering of queue results

use crate::core::time::format_millis;
use crate::queue::{Message, SendOutcome};
use colored::Colorize;

/// One line per message: `queue[partition] id key=... value`
pub fn format_message(message: &Message, color: bool) -> String {
    let location = format!("{}[{}]", message.queue, message.partition);
    let id = message.id.as_str();
    let stamp = format_millis(message.timestamp);
    let key = if message.key.is_empty() {
        "-".to_string()
    } else {
        message.key.clone()
    };

    if color {
        format!(
            "{} {} {} key={} {}",
            location.cyan(),
            id.dimmed(),
            stamp.dimmed(),
            key.yellow(),
            message.value
        )
    } else {
        format!("{} {} {} key={} {}", location, id, stamp, key, message.value)
    }
}

pub fn format_outcome(queue: &str, outcome: &SendOutcome, color: bool) -> String {
    let text = match outcome {
        SendOutcome::Sent { partition } => format!("sent to {}[{}]", queue, partition),
        SendOutcome::Delayed { id, due_at } => {
            format!("delayed {} until {}", id, format_millis(*due_at))
        }
        SendOutcome::Skipped => format!("skipped: sending to '{}' is excluded", queue),
    };
    match (color, outcome) {
        (false, _) => text,
        (true, SendOutcome::Skipped) => text.yellow().to_string(),
        (true, _) => text.green().to_string(),
    }
}
