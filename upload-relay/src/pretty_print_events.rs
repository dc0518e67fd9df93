use colored::{ColoredString, Colorize};
use utils::rpc::{
    events::{EventKind, RelayEvent},
    messages::Response,
};

/// Prints one relay event as a timestamped line of the operator log
pub fn print_event(event: &RelayEvent) {
    let timestamp = event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
    println!("[{}] {}", timestamp.bright_black(), colorize(&event.kind));
}

fn colorize(kind: &EventKind) -> ColoredString {
    let line = kind.to_string();
    match kind {
        EventKind::Started { .. } | EventKind::UploadSucceeded { .. } => line.green(),
        EventKind::Stopped => line.yellow(),
        EventKind::AcceptFailed { .. }
        | EventKind::InvalidCommand { .. }
        | EventKind::UploadFailed { .. } => line.red(),
        EventKind::ConnectionOpened { .. } | EventKind::ConnectionClosed { .. } => {
            line.bright_black()
        }
        EventKind::CommandReceived { .. } | EventKind::UploadStarted { .. } => line.blue(),
    }
}

pub fn print_response(response: &Response) {
    let message = if response.is_success() {
        response.message.green()
    } else {
        response.message.red()
    };
    println!("Upload result: {}", message);
}
