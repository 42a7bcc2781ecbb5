//! Identity codec.
//!
//! Every cross-process message is routed by an `(process_id, socket_id)`
//! pair and tagged with a namespace token naming the interface family it
//! travels on. Tokens are parameterized by the id of the process that
//! originates the message, so several main windows on one host never
//! collide.

use serde::{Deserialize, Serialize};
use std::fmt;

const TAB_PREFIX: &str = "org.tabhost.tab";
const MAIN_PREFIX: &str = "org.tabhost.main";

/// Routes a message to exactly one tab-engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub process_id: u32,
    pub socket_id: u64,
}

impl Identity {
    pub fn new(process_id: u32, socket_id: u64) -> Self {
        Self {
            process_id,
            socket_id,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.process_id, self.socket_id)
    }
}

/// The two interface families. `Tab` frames flow child -> main,
/// `Main` frames flow main -> child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    Tab,
    Main,
}

impl Interface {
    fn prefix(self) -> &'static str {
        match self {
            Interface::Tab => TAB_PREFIX,
            Interface::Main => MAIN_PREFIX,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Interface::Tab => Interface::Main,
            Interface::Main => Interface::Tab,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceToken(String);

impl NamespaceToken {
    pub fn new(interface: Interface, process_id: u32) -> Self {
        Self(format!("{}{}", interface.prefix(), process_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode a raw token into its interface family and originating pid.
    pub fn parse(raw: &str) -> Option<(Interface, u32)> {
        [Interface::Tab, Interface::Main]
            .into_iter()
            .find_map(|interface| {
                let digits = raw.strip_prefix(interface.prefix())?;
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                digits.parse().ok().map(|pid| (interface, pid))
            })
    }

    pub fn interface(&self) -> Option<Interface> {
        Self::parse(&self.0).map(|(interface, _)| interface)
    }

    pub fn process_id(&self) -> Option<u32> {
        Self::parse(&self.0).map(|(_, pid)| pid)
    }
}

impl fmt::Display for NamespaceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Namespace for messages a child process sends to the main window.
pub fn encode_tab_interface(process_id: u32) -> NamespaceToken {
    NamespaceToken::new(Interface::Tab, process_id)
}

/// Namespace for messages the main window sends to its children.
pub fn encode_main_interface(process_id: u32) -> NamespaceToken {
    NamespaceToken::new(Interface::Main, process_id)
}
