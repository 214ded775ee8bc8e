//! Authentication method sets.
//!
//! A user's login requirement is an ordered list of method sets; the login is
//! complete as soon as the methods the client has satisfied equal any element
//! of the list. Satisfied methods are cleared from every element, so an empty
//! set means "nothing left to do".

use bitflags::bitflags;

bitflags! {
    /// One authentication method. Today only passwords exist; the mask keeps
    /// the wire and session plumbing stable if more arrive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AuthMethods: u32 {
        const PASSWORD = 0b0000_0001;
    }
}

/// The ordered list of alternative method sets a user may complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodsList {
    sets: Vec<AuthMethods>,
}

impl MethodsList {
    pub fn new(sets: Vec<AuthMethods>) -> Self {
        MethodsList { sets }
    }

    pub fn password_only() -> Self {
        MethodsList {
            sets: vec![AuthMethods::PASSWORD],
        }
    }

    /// No methods required at all; authentication is already complete.
    pub fn none() -> Self {
        MethodsList {
            sets: vec![AuthMethods::empty()],
        }
    }

    /// Clear `satisfied` from every alternative.
    pub fn satisfy(&mut self, satisfied: AuthMethods) {
        for set in &mut self.sets {
            set.remove(satisfied);
        }
    }

    /// True once any alternative has been fully satisfied.
    pub fn is_complete(&self) -> bool {
        self.sets.iter().any(|s| s.is_empty())
    }

    /// The methods still wanted by the first uncompleted alternative.
    pub fn next_wanted(&self) -> Option<AuthMethods> {
        self.sets.iter().find(|s| !s.is_empty()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_completes_the_default_list() {
        let mut list = MethodsList::password_only();
        assert!(!list.is_complete());
        assert_eq!(list.next_wanted(), Some(AuthMethods::PASSWORD));

        list.satisfy(AuthMethods::PASSWORD);
        assert!(list.is_complete());
    }

    #[test]
    fn empty_set_means_complete() {
        assert!(MethodsList::none().is_complete());
    }
}
