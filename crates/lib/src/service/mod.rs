//! Externally callable session operations.
//!
//! [`SessionService`] is what a transport layer exposes. Every operation takes
//! the identity of the caller as a [`Caller`] where it matters, enforces the
//! privilege checks and sanitises errors: the session taxonomy passes through
//! unchanged while provider failures and anything unexpected become
//! [`SessionError::Internal`], so backing-store detail never reaches a client.


use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::Result;
use crate::constants::INTERNAL_AGENT;
use crate::manager::{CreationRequest, InternalCapability, SessionError, SessionManager};
use crate::security::{AdminPrivilege, Authenticator, Principal};
use crate::session::SessionContext;

/// The session a request arrives on, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    session: Option<String>,
}

impl Caller {
    /// A caller without a session.
    pub fn guest() -> Self {
        Self { session: None }
    }

    /// A caller acting through the session `uuid`.
    pub fn session(uuid: impl Into<String>) -> Self {
        Self {
            session: Some(uuid.into()),
        }
    }

    pub fn uuid(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn is_guest(&self) -> bool {
        self.session.is_none()
    }
}

/// Extension trait for hiding internal failures from remote callers.
trait SanitizeExt<T> {
    fn sanitized(self, operation: &'static str) -> Result<T>;
}

impl<T> SanitizeExt<T> for Result<T> {
    fn sanitized(self, operation: &'static str) -> Result<T> {
        self.map_err(|err| match err {
            crate::Error::Session(e) if !e.is_provider_failure() => crate::Error::Session(e),
            other => {
                warn!(operation, error = %other, "Hiding internal failure from caller");
                SessionError::Internal { operation }.into()
            }
        })
    }
}

/// The session operations offered to clients.
pub struct SessionService {
    manager: Arc<SessionManager>,
    authenticator: Arc<dyn Authenticator>,
}

impl SessionService {
    pub fn new(manager: Arc<SessionManager>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            manager,
            authenticator,
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// The live session of `caller`.
    async fn current(
        &self,
        caller: &Caller,
        operation: &'static str,
    ) -> Result<Arc<SessionContext>> {
        let Some(uuid) = caller.uuid() else {
            return Err(SessionError::SecurityViolation {
                reason: format!("{operation} requires a logged in user"),
            }
            .into());
        };
        self.manager.find(uuid).await.sanitized(operation)
    }

    /// Log in with a password. Available to guests.
    pub async fn create_session(
        &self,
        principal: Principal,
        password: &str,
        agent: Option<String>,
        ip: Option<String>,
    ) -> Result<Arc<SessionContext>> {
        let authenticator = Arc::clone(&self.authenticator);
        let user_name = principal.user_name().to_string();
        let password = password.to_string();
        let check = {
            let user_name = user_name.clone();
            tokio::task::spawn_blocking(move || {
                authenticator.check_password(&user_name, &password)
            })
        };
        let valid = check
            .await
            .map_err(|_| SessionError::Internal {
                operation: "create_session",
            })?
            .sanitized("create_session")?;
        if !valid {
            info!(user_name = %user_name, "Rejected login");
            return Err(SessionError::AuthenticationFailure {
                user_name,
                reason: "invalid user name or password".to_string(),
            }
            .into());
        }

        let mut request = CreationRequest::new(principal);
        request.agent = agent;
        request.ip = ip;
        self.manager.create(request).await.sanitized("create_session")
    }

    /// Open another session for the caller's own user, optionally in another group.
    pub async fn create_user_session(
        &self,
        caller: &Caller,
        time_to_live: Option<u64>,
        time_to_idle: Option<u64>,
        group_name: Option<&str>,
    ) -> Result<Arc<SessionContext>> {
        let current = self.current(caller, "create_user_session").await?;
        let mut principal = current.principal();
        if let Some(group) = group_name {
            principal = principal.with_group(group);
        }

        let mut request = CreationRequest::new(principal);
        request.agent = current.record().user_agent.clone();
        request.ip = current.record().user_ip.clone();
        request.time_to_live = time_to_live;
        request.time_to_idle = time_to_idle;
        self.manager
            .create(request)
            .await
            .sanitized("create_user_session")
    }

    /// Open a session for another principal.
    ///
    /// The caller needs [`AdminPrivilege::Sudo`] or must lead the group the
    /// principal would act in.
    pub async fn create_session_with_timeouts(
        &self,
        caller: &Caller,
        principal: Principal,
        time_to_live: u64,
        time_to_idle: u64,
    ) -> Result<Arc<SessionContext>> {
        const OPERATION: &str = "create_session_with_timeouts";
        let current = self.current(caller, OPERATION).await?;
        if !current.has_privilege(AdminPrivilege::Sudo) {
            let target = self.manager.resolve(&principal).await.sanitized(OPERATION)?;
            if !current.details().leads(target.group_id) {
                return Err(SessionError::SecurityViolation {
                    reason: format!(
                        "{} may not create sessions in group {}",
                        current.details().user_name,
                        target.group_name
                    ),
                }
                .into());
            }
        }

        let request = CreationRequest::new(principal)
            .with_timeouts(time_to_live, time_to_idle)
            .with_sudoer(current.owner_id());
        let context = self.manager.create(request).await.sanitized(OPERATION)?;
        info!(
            uuid = %context.uuid(),
            sudoer = current.owner_id(),
            "Created session on behalf of another user"
        );
        Ok(context)
    }

    pub async fn get_session(&self, uuid: &str) -> Result<Arc<SessionContext>> {
        self.manager.find(uuid).await.sanitized("get_session")
    }

    pub async fn get_reference_count(&self, uuid: &str) -> Result<i32> {
        self.manager
            .reference_count(uuid)
            .await
            .sanitized("get_reference_count")
    }

    /// Replace a session with `context`.
    ///
    /// Holders of [`AdminPrivilege::WriteSession`] may update any session
    /// without validation. Everyone else may only update their own sessions,
    /// and the update is validated.
    pub async fn update_session(
        &self,
        caller: &Caller,
        context: SessionContext,
    ) -> Result<Arc<SessionContext>> {
        const OPERATION: &str = "update_session";
        let current = self.current(caller, OPERATION).await?;
        if current.has_privilege(AdminPrivilege::WriteSession) {
            return self
                .manager
                .update_trusted(context, &InternalCapability::new())
                .await
                .sanitized(OPERATION);
        }

        let target = self.manager.find(context.uuid()).await.sanitized(OPERATION)?;
        if target.owner_id() != current.owner_id() {
            return Err(SessionError::SecurityViolation {
                reason: format!("session {} belongs to another user", context.uuid()),
            }
            .into());
        }
        self.manager.update(context).await.sanitized(OPERATION)
    }

    /// Close a session, returning [`CloseOutcome::code`](crate::CloseOutcome::code).
    pub async fn close_session(&self, uuid: &str) -> Result<i32> {
        let outcome = self.manager.close(uuid).await.sanitized("close_session")?;
        Ok(outcome.code())
    }

    pub async fn detach_session(&self, uuid: &str) -> Result<i32> {
        self.manager.detach(uuid).await.sanitized("detach_session")
    }

    /// All open sessions of the caller's user.
    pub async fn get_my_open_sessions(
        &self,
        caller: &Caller,
    ) -> Result<Vec<Arc<SessionContext>>> {
        let current = self.current(caller, "get_my_open_sessions").await?;
        Ok(self.manager.open_sessions(current.owner_id()))
    }

    /// Open sessions of the caller's user created through `agent`.
    pub async fn get_my_open_agent_sessions(
        &self,
        caller: &Caller,
        agent: &str,
    ) -> Result<Vec<Arc<SessionContext>>> {
        let mut sessions = self.get_my_open_sessions(caller).await?;
        sessions.retain(|context| context.record().user_agent.as_deref() == Some(agent));
        Ok(sessions)
    }

    /// Open sessions of the caller's user that belong to clients rather than the system.
    pub async fn get_my_open_client_sessions(
        &self,
        caller: &Caller,
    ) -> Result<Vec<Arc<SessionContext>>> {
        let mut sessions = self.get_my_open_sessions(caller).await?;
        sessions
            .retain(|context| context.record().user_agent.as_deref() != Some(INTERNAL_AGENT));
        Ok(sessions)
    }

    pub async fn get_input(&self, uuid: &str, key: &str) -> Result<Option<Value>> {
        self.manager.input(uuid, key).await.sanitized("get_input")
    }

    pub async fn get_output(&self, uuid: &str, key: &str) -> Result<Option<Value>> {
        self.manager.output(uuid, key).await.sanitized("get_output")
    }

    pub async fn set_input(
        &self,
        uuid: &str,
        key: &str,
        value: Option<Value>,
    ) -> Result<Option<Value>> {
        self.manager
            .set_input(uuid, key, value)
            .await
            .sanitized("set_input")
    }

    pub async fn set_output(
        &self,
        uuid: &str,
        key: &str,
        value: Option<Value>,
    ) -> Result<Option<Value>> {
        self.manager
            .set_output(uuid, key, value)
            .await
            .sanitized("set_output")
    }

    pub async fn get_input_keys(&self, uuid: &str) -> Result<Vec<String>> {
        self.manager.input_keys(uuid).await.sanitized("get_input_keys")
    }

    pub async fn get_output_keys(&self, uuid: &str) -> Result<Vec<String>> {
        self.manager
            .output_keys(uuid)
            .await
            .sanitized("get_output_keys")
    }

    pub async fn get_inputs(&self, uuid: &str) -> Result<BTreeMap<String, Value>> {
        self.manager.inputs(uuid).await.sanitized("get_inputs")
    }

    pub async fn get_outputs(&self, uuid: &str) -> Result<BTreeMap<String, Value>> {
        self.manager.outputs(uuid).await.sanitized("get_outputs")
    }
}
