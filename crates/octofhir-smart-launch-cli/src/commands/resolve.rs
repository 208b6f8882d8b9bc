use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use octofhir_smart_launch::{
    AuthenticationFlowContext, ContextServiceClient, FlowFailure, FlowOutcome, HostFlowError,
    LaunchError, LaunchRequest, LaunchSession, MemorySession, SmartLaunchAuthenticator,
};
use serde_json::json;

use crate::cli::{OutputFormat, ResolveArgs};
use crate::output::{print_error, print_field, print_json, print_success, render_table};
use crate::settings::CliConfig;

/// One authorization request served from the command line.
struct CliFlow {
    request: LaunchRequest,
    session: MemorySession,
    failure: Option<(HostFlowError, FlowFailure)>,
}

impl CliFlow {
    fn new(args: &ResolveArgs) -> Self {
        Self {
            request: LaunchRequest::from_scope_param(
                &args.scope,
                args.launch.clone(),
                args.client_id.as_str(),
                args.redirect_uri.as_str(),
            ),
            session: MemorySession::new(),
            failure: None,
        }
    }
}

impl LaunchSession for CliFlow {
    fn session_note(&self, key: &str) -> Option<String> {
        self.session.session_note(key)
    }

    fn set_session_note(&mut self, key: &str, value: &str) -> Result<(), LaunchError> {
        self.session.set_session_note(key, value)
    }

    fn remove_session_note(&mut self, key: &str) -> Result<(), LaunchError> {
        self.session.remove_session_note(key)
    }

    fn client_attribute(&self, key: &str) -> Option<String> {
        self.session.client_attribute(key)
    }

    fn set_client_attribute(&mut self, key: &str, value: &str) -> Result<(), LaunchError> {
        self.session.set_client_attribute(key, value)
    }

    fn remove_client_attribute(&mut self, key: &str) -> Result<(), LaunchError> {
        self.session.remove_client_attribute(key)
    }
}

impl AuthenticationFlowContext for CliFlow {
    fn requested_scopes(&self) -> BTreeSet<String> {
        self.request.requested_scopes.clone()
    }

    fn launch_parameter(&self) -> Option<String> {
        self.request.launch_token.clone()
    }

    fn client_id(&self) -> String {
        self.request.client_id.clone()
    }

    fn redirect_uri(&self) -> String {
        self.request.redirect_uri.clone()
    }

    fn report_continue(&mut self) {
        self.failure = None;
    }

    fn report_failure(&mut self, error: HostFlowError, failure: FlowFailure) {
        self.failure = Some((error, failure));
    }
}

pub async fn run(config: &CliConfig, args: &ResolveArgs, format: OutputFormat) -> Result<()> {
    let launch = config
        .launch_config()
        .context("Invalid launch configuration")?;
    let client = ContextServiceClient::from_launch_config(launch)
        .context("Failed to create context service client")?;
    let authenticator = SmartLaunchAuthenticator::new(Arc::new(client));

    let mut flow = CliFlow::new(args);
    let outcome = authenticator.authenticate(&mut flow).await;
    authenticator.close();

    match format {
        OutputFormat::Json => print_json(&json!({
            "outcome": outcome,
            "host_error": flow.failure.as_ref().map(|(error, _)| error),
            "session_notes": flow.session.notes,
            "client_attributes": flow.session.client_attributes,
        }))?,
        OutputFormat::Text => print_outcome(&outcome, &flow),
    }

    if let FlowOutcome::Failure(failure) = &outcome {
        bail!("Launch failed: {}", failure.description);
    }
    Ok(())
}

fn print_outcome(outcome: &FlowOutcome, flow: &CliFlow) {
    match outcome {
        FlowOutcome::Continue { flavor, state } => {
            print_success(&format!("Launch {state} ({flavor:?})"));
            let rows: Vec<[String; 3]> = flow
                .session
                .notes
                .iter()
                .map(|(k, v)| ["note".to_string(), k.clone(), v.clone()])
                .chain(
                    flow.session
                        .client_attributes
                        .iter()
                        .map(|(k, v)| ["client attribute".to_string(), k.clone(), v.clone()]),
                )
                .collect();
            if rows.is_empty() {
                println!("No launch context bound.");
            } else {
                println!("{}", render_table(["Scope", "Key", "Value"], rows));
            }
        }
        FlowOutcome::Failure(failure) => {
            print_error(&format!("Launch {}", failure.state));
            print_field("Error", Some(failure.error_code));
            print_field("Status", Some(&failure.status.to_string()));
            if let Some((error, _)) = &flow.failure {
                print_field("Host error", Some(&format!("{error:?}")));
            }
            print_field("Location", failure.location().as_deref());
        }
    }
}

#[cfg(test)]
mod tests {
    use octofhir_smart_launch::LaunchFlavor;

    use super::*;

    fn args(scope: &str, launch: Option<&str>) -> ResolveArgs {
        ResolveArgs {
            launch: launch.map(str::to_string),
            scope: scope.to_string(),
            client_id: "cli".to_string(),
            redirect_uri: "http://localhost/callback".to_string(),
        }
    }

    #[test]
    fn test_cli_flow_builds_request() {
        let flow = CliFlow::new(&args("openid  launch", Some("abc")));
        assert_eq!(flow.request.flavor(), LaunchFlavor::EhrLaunch);
        assert_eq!(flow.launch_parameter().as_deref(), Some("abc"));
        assert_eq!(flow.client_id(), "cli");
    }

    #[test]
    fn test_cli_flow_records_failure() {
        let mut flow = CliFlow::new(&args("launch", None));
        let failure = FlowFailure::server_error(&LaunchError::EmptyContext);
        flow.report_failure(HostFlowError::InvalidClientSession, failure.clone());
        assert_eq!(
            flow.failure,
            Some((HostFlowError::InvalidClientSession, failure))
        );

        flow.report_continue();
        assert!(flow.failure.is_none());
    }
}
