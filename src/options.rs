//! Handshake options and application callbacks.
//!
//! Callbacks return boxed futures so the handshake can suspend on them, e.g.
//! a responder that looks up credentials for the requested host name.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::engine::{Certificate, ClientHello, HandshakeParams, PeerValidation, ServerCredentials};
use crate::error::Result;

/// Chooses responder credentials from the initiator's first message.
pub trait CredentialSelector: Send + Sync {
    fn select<'a>(&'a self, hello: &'a ClientHello) -> BoxFuture<'a, Result<ServerCredentials>>;
}

/// Judges the certificate chain presented by the peer.
pub trait PeerValidator: Send + Sync {
    fn validate<'a>(&'a self, peer: &'a PeerValidation) -> BoxFuture<'a, bool>;
}

impl<F> PeerValidator for F
where
    F: Fn(&PeerValidation) -> bool + Send + Sync,
{
    fn validate<'a>(&'a self, peer: &'a PeerValidation) -> BoxFuture<'a, bool> {
        Box::pin(futures::future::ready(self(peer)))
    }
}

/// Options for [`SecureStream::authenticate_as_client`](crate::SecureStream::authenticate_as_client).
#[derive(Clone)]
pub struct ClientOptions {
    /// Host name sent to the responder and checked against its certificate.
    pub server_name: Option<String>,
    /// Application protocols offered, most preferred first.
    pub application_protocols: Vec<Vec<u8>>,
    /// Certificate presented when the responder asks for one.
    pub client_certificate: Option<Certificate>,
    /// Whether a responder-initiated renegotiation is honoured.
    pub allow_renegotiation: bool,
    /// Peer certificate policy. Without one, any certificate is accepted.
    pub validator: Option<Arc<dyn PeerValidator>>,
}

impl ClientOptions {
    /// Options for a connection to `server_name`.
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: Some(server_name.into()),
            ..Self::default()
        }
    }

    /// Offer (or accept) an application protocol, in preference order.
    pub fn application_protocol(mut self, protocol: impl Into<Vec<u8>>) -> Self {
        self.application_protocols.push(protocol.into());
        self
    }

    /// Certificate to present if the responder asks for one.
    pub fn client_certificate(mut self, certificate: Certificate) -> Self {
        self.client_certificate = Some(certificate);
        self
    }

    /// Whether a peer may request renegotiation. Defaults to `true`.
    pub fn allow_renegotiation(mut self, allow: bool) -> Self {
        self.allow_renegotiation = allow;
        self
    }

    /// Judge the peer's certificate chain.
    pub fn validator(mut self, validator: impl PeerValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub(crate) fn handshake_params(&self) -> HandshakeParams {
        HandshakeParams {
            server_name: self.server_name.clone(),
            application_protocols: self.application_protocols.clone(),
            local_certificate: self.client_certificate.clone(),
            client_certificate_required: false,
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            server_name: None,
            application_protocols: Vec::new(),
            client_certificate: None,
            allow_renegotiation: true,
            validator: None,
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("server_name", &self.server_name)
            .field("application_protocols", &self.application_protocols.len())
            .field("client_certificate", &self.client_certificate.is_some())
            .field("allow_renegotiation", &self.allow_renegotiation)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// Where a responder's certificate comes from.
#[derive(Clone)]
pub enum CredentialSource {
    Fixed(ServerCredentials),
    Selector(Arc<dyn CredentialSelector>),
}

/// Options for [`SecureStream::authenticate_as_server`](crate::SecureStream::authenticate_as_server).
#[derive(Clone)]
pub struct ServerOptions {
    pub credentials: CredentialSource,
    /// Application protocols accepted, most preferred first.
    pub application_protocols: Vec<Vec<u8>>,
    pub client_certificate_required: bool,
    pub allow_renegotiation: bool,
    pub validator: Option<Arc<dyn PeerValidator>>,
}

impl ServerOptions {
    /// Responder that always presents `credentials`.
    pub fn with_credentials(credentials: ServerCredentials) -> Self {
        Self::from_source(CredentialSource::Fixed(credentials))
    }

    /// Responder that picks credentials per client hello.
    pub fn with_selector(selector: impl CredentialSelector + 'static) -> Self {
        Self::from_source(CredentialSource::Selector(Arc::new(selector)))
    }

    fn from_source(credentials: CredentialSource) -> Self {
        Self {
            credentials,
            application_protocols: Vec::new(),
            client_certificate_required: false,
            allow_renegotiation: true,
            validator: None,
        }
    }

    /// Offer (or accept) an application protocol, in preference order.
    pub fn application_protocol(mut self, protocol: impl Into<Vec<u8>>) -> Self {
        self.application_protocols.push(protocol.into());
        self
    }

    /// Require the initiator to present a certificate.
    pub fn client_certificate_required(mut self, required: bool) -> Self {
        self.client_certificate_required = required;
        self
    }

    /// Whether a peer may request renegotiation. Defaults to `true`.
    pub fn allow_renegotiation(mut self, allow: bool) -> Self {
        self.allow_renegotiation = allow;
        self
    }

    /// Judge the peer's certificate chain.
    pub fn validator(mut self, validator: impl PeerValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub(crate) fn selector(&self) -> Option<Arc<dyn CredentialSelector>> {
        match &self.credentials {
            CredentialSource::Fixed(_) => None,
            CredentialSource::Selector(selector) => Some(selector.clone()),
        }
    }

    pub(crate) fn handshake_params(&self) -> HandshakeParams {
        let local_certificate = match &self.credentials {
            CredentialSource::Fixed(creds) => Some(creds.certificate.clone()),
            CredentialSource::Selector(_) => None,
        };
        HandshakeParams {
            server_name: None,
            application_protocols: self.application_protocols.clone(),
            local_certificate,
            client_certificate_required: self.client_certificate_required,
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let credentials = match self.credentials {
            CredentialSource::Fixed(_) => "fixed",
            CredentialSource::Selector(_) => "selector",
        };
        f.debug_struct("ServerOptions")
            .field("credentials", &credentials)
            .field("application_protocols", &self.application_protocols.len())
            .field("client_certificate_required", &self.client_certificate_required)
            .field("allow_renegotiation", &self.allow_renegotiation)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Role;

    #[test]
    fn test_client_params() {
        let opts = ClientOptions::new("example.test")
            .application_protocol("h2")
            .client_certificate(Certificate::from_static(b"me"));
        let params = opts.handshake_params();

        assert_eq!(params.server_name.as_deref(), Some("example.test"));
        assert_eq!(params.application_protocols, vec![b"h2".to_vec()]);
        assert!(params.local_certificate.is_some());
        assert!(!params.client_certificate_required);
    }

    #[test]
    fn test_server_params_fixed_and_selector() {
        struct Never;
        impl CredentialSelector for Never {
            fn select<'a>(
                &'a self,
                _hello: &'a ClientHello,
            ) -> BoxFuture<'a, Result<ServerCredentials>> {
                Box::pin(futures::future::pending())
            }
        }

        let fixed = ServerOptions::with_credentials(ServerCredentials {
            certificate: Certificate::from_static(b"srv"),
        })
        .client_certificate_required(true);
        assert!(fixed.handshake_params().local_certificate.is_some());
        assert!(fixed.handshake_params().client_certificate_required);
        assert!(fixed.selector().is_none());

        let selected = ServerOptions::with_selector(Never);
        assert!(selected.handshake_params().local_certificate.is_none());
        assert!(selected.selector().is_some());
    }

    #[test]
    fn test_closure_validator() {
        let validator = |peer: &PeerValidation| peer.chain.len() == 1;
        let peer = PeerValidation {
            role: Role::Client,
            chain: vec![Certificate::from_static(b"c")],
            server_name: None,
        };
        assert!(futures::executor::block_on(validator.validate(&peer)));
    }
}
