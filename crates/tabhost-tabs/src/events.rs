//! Tab events fanned out to the window.

use crate::wire::TabNotification;

#[derive(Debug, Clone, PartialEq)]
pub enum TabEvent {
    TitleChanged { socket_id: u64, title: String },
    UriChanged { socket_id: u64, uri: String },
    ProgressChanged { socket_id: u64, progress: f64 },
    BackForwardChanged {
        socket_id: u64,
        can_go_back: bool,
        can_go_forward: bool,
    },
    /// The tab lost its process and waits for a replacement.
    Reconnecting { socket_id: u64, process_id: u32 },
    /// The tab is bound to a (possibly new) process again.
    Rebound { socket_id: u64, process_id: u32 },
    /// No replacement process could be started. Terminal.
    Failed { socket_id: u64, reason: String },
    Closed { socket_id: u64 },
}

impl TabEvent {
    /// The event a notification from `socket_id` produces, if any.
    pub fn from_notification(socket_id: u64, notification: &TabNotification) -> Option<Self> {
        let event = match notification {
            TabNotification::Title { title } => TabEvent::TitleChanged {
                socket_id,
                title: title.clone(),
            },
            TabNotification::Uri { uri } => TabEvent::UriChanged {
                socket_id,
                uri: uri.clone(),
            },
            TabNotification::Progress { progress } => TabEvent::ProgressChanged {
                socket_id,
                progress: *progress,
            },
            TabNotification::BackForward {
                can_go_back,
                can_go_forward,
            } => TabEvent::BackForwardChanged {
                socket_id,
                can_go_back: *can_go_back,
                can_go_forward: *can_go_forward,
            },
            TabNotification::History { .. } => return None,
        };
        Some(event)
    }

    pub fn socket_id(&self) -> u64 {
        match *self {
            TabEvent::TitleChanged { socket_id, .. }
            | TabEvent::UriChanged { socket_id, .. }
            | TabEvent::ProgressChanged { socket_id, .. }
            | TabEvent::BackForwardChanged { socket_id, .. }
            | TabEvent::Reconnecting { socket_id, .. }
            | TabEvent::Rebound { socket_id, .. }
            | TabEvent::Failed { socket_id, .. }
            | TabEvent::Closed { socket_id } => socket_id,
        }
    }
}
