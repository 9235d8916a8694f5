//! Conversation states and the transition table

/// Where a user is in the sticker workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationState {
    /// Waiting for a sticker description
    #[default]
    Description,
    /// A sticker was generated; waiting for add / regenerate / finish
    Options,
    /// Waiting for an existing pack or "create new"
    PackSelection,
    /// Waiting for the new pack's title
    CreatePack,
}

/// Outcome of handling one event, fed to the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A new artifact is live
    Generated,
    GenerationFailed,
    /// The pack menu was shown
    PacksOffered,
    /// The user was asked for a pack title
    NamePrompted,
    BackToOptions,
    /// Telegram refused the derived set name; the artifact stays live
    NameTaken,
    /// The title failed local validation; the artifact stays live
    NameInvalid,
    /// The sticker landed in a pack
    Committed,
    /// Any other failure; the artifact is discarded
    Failed,
    /// Finish, skip, cancel or start
    Reset,
    /// An event that does not apply here; the current menu was re-shown
    StaleInput,
}

impl ConversationState {
    /// Next state, or None if the pair is not in the table
    pub fn next(self, transition: Transition) -> Option<ConversationState> {
        use ConversationState::*;
        use Transition::*;

        match (self, transition) {
            (_, Reset) => Some(Description),
            (state, StaleInput) => Some(state),

            (Description | Options | PackSelection, Generated) => Some(Options),
            (Description | Options | PackSelection, GenerationFailed) => Some(Description),

            (Options, PacksOffered) => Some(PackSelection),
            (Options, Failed) => Some(Description),

            (PackSelection, NamePrompted) => Some(CreatePack),
            (PackSelection | CreatePack, BackToOptions) => Some(Options),
            (PackSelection | CreatePack, Committed | Failed) => Some(Description),

            (CreatePack, NameTaken | NameInvalid) => Some(CreatePack),

            _ => None,
        }
    }

    /// States in which the session must hold a live artifact
    pub fn holds_artifact(self) -> bool {
        !matches!(self, ConversationState::Description)
    }
}

#[cfg(test)]
mod tests {
    use super::ConversationState::*;
    use super::Transition::*;
    use super::*;

    #[test]
    fn test_happy_path_create() {
        let state = Description;
        let state = state.next(Generated).unwrap();
        assert_eq!(state, Options);
        let state = state.next(PacksOffered).unwrap();
        assert_eq!(state, PackSelection);
        let state = state.next(NamePrompted).unwrap();
        assert_eq!(state, CreatePack);
        assert_eq!(state.next(Committed), Some(Description));
    }

    #[test]
    fn test_name_taken_loops() {
        assert_eq!(CreatePack.next(NameTaken), Some(CreatePack));
        assert_eq!(CreatePack.next(NameInvalid), Some(CreatePack));
        assert_eq!(CreatePack.next(Failed), Some(Description));
    }

    #[test]
    fn test_pack_selection_always_ends_in_description() {
        assert_eq!(PackSelection.next(Committed), Some(Description));
        assert_eq!(PackSelection.next(Failed), Some(Description));
        assert_eq!(PackSelection.next(BackToOptions), Some(Options));
    }

    #[test]
    fn test_reset_from_anywhere() {
        for state in [Description, Options, PackSelection, CreatePack] {
            assert_eq!(state.next(Reset), Some(Description));
            assert_eq!(state.next(StaleInput), Some(state));
        }
    }

    #[test]
    fn test_regenerate_and_fresh_description() {
        assert_eq!(Options.next(Generated), Some(Options));
        assert_eq!(Options.next(GenerationFailed), Some(Description));
        assert_eq!(PackSelection.next(Generated), Some(Options));
    }

    #[test]
    fn test_invalid_pairs() {
        assert_eq!(Description.next(PacksOffered), None);
        assert_eq!(Description.next(Committed), None);
        assert_eq!(Options.next(NameTaken), None);
        assert_eq!(CreatePack.next(Generated), None);
        assert_eq!(Options.next(NamePrompted), None);
    }

    #[test]
    fn test_holds_artifact() {
        assert!(!Description.holds_artifact());
        assert!(Options.holds_artifact());
        assert!(PackSelection.holds_artifact());
        assert!(CreatePack.holds_artifact());
    }
}
