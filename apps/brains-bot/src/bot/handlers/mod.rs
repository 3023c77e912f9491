use tracing::error;

use crate::messages;
use crate::services::provisioning_service::ProvisionError;

pub mod admin;
pub mod callback;
pub mod command;

/// Maps a provisioning failure to what the user is told. Gateway and
/// database details only go to the log.
pub(crate) fn provision_failure_text(user_id: i64, e: &ProvisionError) -> &'static str {
    match e {
        ProvisionError::NoSubscription(_) => messages::NOT_REGISTERED,
        ProvisionError::Inactive(_) => messages::NEEDS_ACTIVE,
        ProvisionError::NoGateway | ProvisionError::GatewayNotFound(_) => messages::NO_SERVERS,
        ProvisionError::Gateway(_) | ProvisionError::Store(_) => {
            error!("Provisioning for user {} failed: {}", user_id, e);
            messages::PROVISION_FAILED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brains_gateway::GatewayError;

    #[test]
    fn gateway_details_stay_out_of_replies() {
        let e = ProvisionError::Gateway(GatewayError::CommandFailed {
            command: "wg genkey".to_string(),
            exit_status: 1,
            stderr: "secret detail".to_string(),
        });
        let text = provision_failure_text(7, &e);
        assert_eq!(text, messages::PROVISION_FAILED);
        assert!(!text.contains("secret"));
        assert_eq!(
            provision_failure_text(7, &ProvisionError::Inactive(7)),
            messages::NEEDS_ACTIVE
        );
    }
}
