//! Bridge from a [`PairingAgent`] to a `bluer` agent.
//!
//! `bluer` announces the IO capability from the set of installed
//! callbacks, so only the prompts the capability allows are wired.

use bluer::agent::{
    Agent, DisplayPasskey, DisplayPinCode, ReqError, RequestAuthorization, RequestConfirmation,
    RequestPasskey, RequestPinCode,
};
use gattkit_app::agent::PairingAgent;
use gattkit_domain::error::AgentError;

pub(crate) fn agent_error(err: AgentError) -> ReqError {
    match err {
        AgentError::Canceled => ReqError::Canceled,
        AgentError::Rejected | AgentError::Timeout => ReqError::Rejected,
    }
}

/// Build the `bluer` agent registered as the default for every controller.
pub(crate) fn default_agent(agent: &PairingAgent) -> Agent {
    let capability = agent.capability();
    let mut bluer_agent = Agent {
        request_default: true,
        ..Default::default()
    };

    if capability.has_input() {
        let pin_agent = agent.clone();
        bluer_agent.request_pin_code = Some(Box::new(move |req: RequestPinCode| {
            let agent = pin_agent.clone();
            Box::pin(async move {
                agent
                    .request_pin_code(&req.device.to_string())
                    .await
                    .map_err(agent_error)
            })
        }));
        let passkey_agent = agent.clone();
        bluer_agent.request_passkey = Some(Box::new(move |req: RequestPasskey| {
            let agent = passkey_agent.clone();
            Box::pin(async move {
                agent
                    .request_passkey(&req.device.to_string())
                    .await
                    .map_err(agent_error)
            })
        }));
    }

    if capability.has_display() {
        let pin_agent = agent.clone();
        bluer_agent.display_pin_code = Some(Box::new(move |req: DisplayPinCode| {
            pin_agent.display_pin_code(&req.device.to_string(), &req.pincode);
            Box::pin(async { Ok(()) })
        }));
        let passkey_agent = agent.clone();
        bluer_agent.display_passkey = Some(Box::new(move |req: DisplayPasskey| {
            passkey_agent.display_passkey(&req.device.to_string(), req.passkey, req.entered);
            Box::pin(async { Ok(()) })
        }));
    }

    if capability.can_confirm() {
        let confirm_agent = agent.clone();
        bluer_agent.request_confirmation = Some(Box::new(move |req: RequestConfirmation| {
            let agent = confirm_agent.clone();
            Box::pin(async move {
                agent
                    .request_confirmation(&req.device.to_string(), req.passkey)
                    .await
                    .map_err(agent_error)
            })
        }));
    }

    let auth_agent = agent.clone();
    bluer_agent.request_authorization = Some(Box::new(move |req: RequestAuthorization| {
        let agent = auth_agent.clone();
        Box::pin(async move {
            agent
                .request_authorization(&req.device.to_string())
                .await
                .map_err(agent_error)
        })
    }));

    bluer_agent
}

#[cfg(test)]
mod tests {
    use gattkit_app::agent::AgentPolicy;
    use gattkit_domain::pairing::AgentCapability;
    use gattkit_domain::path::ObjectPath;

    use super::*;

    fn pairing_agent(capability: AgentCapability) -> PairingAgent {
        PairingAgent::new(
            ObjectPath::new("/org/gattkit/hci0/app/agent").unwrap(),
            capability,
            AgentPolicy::default(),
        )
    }

    #[test]
    fn should_map_agent_errors() {
        assert!(matches!(agent_error(AgentError::Rejected), ReqError::Rejected));
        assert!(matches!(agent_error(AgentError::Timeout), ReqError::Rejected));
        assert!(matches!(agent_error(AgentError::Canceled), ReqError::Canceled));
    }

    #[test]
    fn should_only_authorize_without_io() {
        let agent = default_agent(&pairing_agent(AgentCapability::NoInputNoOutput));
        assert!(agent.request_default);
        assert!(agent.request_authorization.is_some());
        assert!(agent.request_pin_code.is_none());
        assert!(agent.display_passkey.is_none());
        assert!(agent.request_confirmation.is_none());
    }

    #[test]
    fn should_wire_every_prompt_for_keyboard_display() {
        let agent = default_agent(&pairing_agent(AgentCapability::KeyboardDisplay));
        assert!(agent.request_pin_code.is_some());
        assert!(agent.request_passkey.is_some());
        assert!(agent.display_pin_code.is_some());
        assert!(agent.display_passkey.is_some());
        assert!(agent.request_confirmation.is_some());
    }

    #[test]
    fn should_confirm_without_keyboard_for_display_yes_no() {
        let agent = default_agent(&pairing_agent(AgentCapability::DisplayYesNo));
        assert!(agent.request_confirmation.is_some());
        assert!(agent.request_pin_code.is_none());
    }
}
