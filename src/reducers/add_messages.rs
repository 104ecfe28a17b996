use super::Reducer;
use crate::{channels::Channel, node::NodePartial, state::VersionedState};

#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct AddMessages;
impl Reducer for AddMessages {
    fn apply(&self, state: &mut VersionedState, update: &NodePartial) {
        if let Some(messages_update) = &update.messages
            && !messages_update.is_empty()
        {
            state.messages.get_mut().extend(messages_update.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn appends_messages_without_touching_existing() {
        let mut state = VersionedState::new_with_user_message("hello");
        let update = NodePartial::new().with_messages(vec![Message::assistant("hi back")]);
        AddMessages.apply(&mut state, &update);
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages.get()[1].content, "hi back");
    }

    #[test]
    fn empty_update_is_a_no_op() {
        let mut state = VersionedState::new_with_user_message("hello");
        AddMessages.apply(&mut state, &NodePartial::new());
        assert_eq!(state.messages.len(), 1);
    }
}
