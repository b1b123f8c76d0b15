use crate::ScsError;
use scs_schema::ComponentStatus;

pub fn validate_transition(from: ComponentStatus, to: ComponentStatus) -> Result<(), ScsError> {
    use ComponentStatus::{Deleting, Failed, Pending, Provisioning, Running};

    let valid = matches!(
        (from, to),
        (Pending | Failed, Provisioning)
            | (Provisioning, Running)
            | (Pending | Provisioning | Running | Deleting, Failed)
            | (Pending | Provisioning | Running | Failed | Deleting, Deleting)
    );

    if valid {
        Ok(())
    } else {
        Err(ScsError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ComponentStatus::{Deleting, Failed, Pending, Provisioning, Running};

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(Pending, Provisioning).is_ok());
        assert!(validate_transition(Provisioning, Running).is_ok());
        assert!(validate_transition(Provisioning, Failed).is_ok());
        assert!(validate_transition(Running, Deleting).is_ok());
        assert!(validate_transition(Failed, Deleting).is_ok());
        assert!(validate_transition(Deleting, Failed).is_ok());
        assert!(validate_transition(Deleting, Deleting).is_ok()); // retried delete
        assert!(validate_transition(Failed, Provisioning).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(Pending, Running).is_err());
        assert!(validate_transition(Running, Provisioning).is_err());
        assert!(validate_transition(Deleting, Running).is_err());
        assert!(validate_transition(Failed, Running).is_err());
        assert!(validate_transition(Running, Pending).is_err());
    }
}
