use super::Reducer;
use crate::{channels::Channel, node::NodePartial, state::VersionedState};

#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct AddErrors;
impl Reducer for AddErrors {
    fn apply(&self, state: &mut VersionedState, update: &NodePartial) {
        if let Some(errors_update) = &update.errors
            && !errors_update.is_empty()
        {
            state.errors.get_mut().extend(errors_update.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::errors::{ErrorEvent, LadderError};

    #[test]
    fn appends_errors_without_touching_existing() {
        let mut state = VersionedState::new_with_user_message("hello");
        let event = ErrorEvent {
            error: LadderError {
                message: "boom".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let update = NodePartial::new().with_errors(vec![event]);
        AddErrors.apply(&mut state, &update);
        assert_eq!(state.errors.len(), 1);
    }

    #[test]
    fn empty_update_is_a_no_op() {
        let mut state = VersionedState::new_with_user_message("hello");
        AddErrors.apply(&mut state, &NodePartial::new());
        assert_eq!(state.errors.len(), 0);
    }
}
