//! Inbound events and outbound replies exchanged with the dispatcher

use std::path::PathBuf;

/// Prefix of the callback data that selects a pack
const PACK_PREFIX: &str = "pk:";

/// One conversational event from a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Text(String),
    Menu(MenuAction),
    Cancel,
    Start,
}

/// A tappable menu choice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    AddToPack,
    Regenerate,
    Finish,
    Skip,
    /// Pack key (see `registry::naming::pack_key`)
    ChoosePack(String),
    CreatePack,
    Back,
}

impl MenuAction {
    /// Compact encoding that fits Telegram's 64-byte callback data limit
    pub fn callback_data(&self) -> String {
        match self {
            MenuAction::AddToPack => "add".to_string(),
            MenuAction::Regenerate => "regen".to_string(),
            MenuAction::Finish => "finish".to_string(),
            MenuAction::Skip => "skip".to_string(),
            MenuAction::ChoosePack(key) => format!("{}{}", PACK_PREFIX, key),
            MenuAction::CreatePack => "new".to_string(),
            MenuAction::Back => "back".to_string(),
        }
    }

    pub fn parse(data: &str) -> Option<MenuAction> {
        match data {
            "add" => Some(MenuAction::AddToPack),
            "regen" => Some(MenuAction::Regenerate),
            "finish" => Some(MenuAction::Finish),
            "skip" => Some(MenuAction::Skip),
            "new" => Some(MenuAction::CreatePack),
            "back" => Some(MenuAction::Back),
            other => other
                .strip_prefix(PACK_PREFIX)
                .filter(|key| !key.is_empty())
                .map(|key| MenuAction::ChoosePack(key.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: MenuAction,
}

impl Button {
    pub fn new(label: &str, action: MenuAction) -> Self {
        Self {
            label: label.to_string(),
            action,
        }
    }
}

/// Content the engine wants delivered to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// A sticker preview read from this file
    Image(PathBuf),
    /// Text with one button per row
    Menu { text: String, buttons: Vec<Button> },
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }

    pub fn buttons(&self) -> &[Button] {
        match self {
            Reply::Menu { buttons, .. } => buttons,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_choice_callback_data() {
        let action = MenuAction::ChoosePack("0123456789abcdef".to_string());
        assert_eq!(action.callback_data(), "pk:0123456789abcdef");
        assert_eq!(MenuAction::parse("pk:0123456789abcdef"), Some(action));
        assert_eq!(MenuAction::parse("regen"), Some(MenuAction::Regenerate));
    }

    #[test]
    fn test_unknown_callback_data() {
        assert_eq!(MenuAction::parse("pk:"), None);
        assert_eq!(MenuAction::parse("delete"), None);
        assert_eq!(MenuAction::parse(""), None);
    }

    #[test]
    fn test_reply_buttons() {
        let menu = Reply::Menu {
            text: "Pick".to_string(),
            buttons: vec![Button::new("Finish", MenuAction::Finish)],
        };
        assert_eq!(menu.buttons().len(), 1);
        assert!(Reply::text("hi").buttons().is_empty());
    }
}
