//! Transport coordinator: the authorization state machine and the redirect,
//! popup and hidden-frame transports that drive it.

pub mod callback;
pub mod popup;
pub mod redirect;
pub mod silent;

use strum::Display;
use tracing::debug;

use crate::error::AuthError;

pub use callback::{CallbackParams, CallbackReply};
pub use popup::{run_popup, Popup, PopupConfig, PopupHandle};
pub use redirect::Navigator;
pub use silent::{run_silent, SilentFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    Idle,
    RequestSent,
    CallbackReceived,
    TokenExchanging,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Transport {
    Redirect,
    Popup,
    Silent,
}

/// One authorization attempt. Created per attempt and never reused.
#[derive(Debug)]
pub struct AuthorizationFlow {
    transport: Transport,
    state: FlowState,
}

impl AuthorizationFlow {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            state: FlowState::Idle,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    fn advance(&mut self, from: FlowState, to: FlowState) -> Result<(), AuthError> {
        if self.state != from {
            return Err(AuthError::Internal(format!(
                "{} flow cannot move from {} to {to}",
                self.transport, self.state
            )));
        }
        debug!(transport = %self.transport, from = %from, to = %to, "authorization flow transition");
        self.state = to;
        Ok(())
    }

    pub fn request_sent(&mut self) -> Result<(), AuthError> {
        self.advance(FlowState::Idle, FlowState::RequestSent)
    }

    pub fn callback_received(&mut self) -> Result<(), AuthError> {
        self.advance(FlowState::RequestSent, FlowState::CallbackReceived)
    }

    pub fn exchanging(&mut self) -> Result<(), AuthError> {
        self.advance(FlowState::CallbackReceived, FlowState::TokenExchanging)
    }

    pub fn complete(&mut self) -> Result<(), AuthError> {
        self.advance(FlowState::TokenExchanging, FlowState::Complete)
    }

    /// Move to `Error` and hand the error back. `Idle` and finished flows
    /// keep their state.
    pub fn fail(&mut self, error: AuthError) -> AuthError {
        if !matches!(self.state, FlowState::Idle | FlowState::Complete) {
            debug!(
                transport = %self.transport,
                from = %self.state,
                category = %error.category(),
                "authorization flow failed"
            );
            self.state = FlowState::Error;
        }
        error
    }

    /// Run `step`, failing the flow if it errors.
    pub fn check<T>(&mut self, step: Result<T, AuthError>) -> Result<T, AuthError> {
        step.map_err(|err| self.fail(err))
    }
}
