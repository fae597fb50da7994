use async_trait::async_trait;
use lettre::message::header;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpConfig;
use crate::connector::OutboundConnector;
use crate::error::{Error, Result};
use crate::models::OutgoingMessage;

/// Build an RFC 5322 message with an explicit Message-ID.
///
/// `message_id` is given without angle brackets.
pub(crate) fn build_message(email: &OutgoingMessage, message_id: &str) -> Result<Message> {
    let from = email
        .from
        .parse()
        .map_err(|e| Error::Send(format!("Invalid From address: {e}")))?;

    let mut builder = Message::builder()
        .from(from)
        .subject(&email.subject)
        .message_id(Some(format!("<{message_id}>")));

    let mut recipients = 0;
    for addr in &email.to {
        let addr = addr.trim();
        if addr.is_empty() {
            continue;
        }
        builder = builder.to(addr
            .parse()
            .map_err(|e| Error::Send(format!("Invalid To address '{addr}': {e}")))?);
        recipients += 1;
    }
    if recipients == 0 {
        return Err(Error::Send("No recipients specified".into()));
    }

    if let Some(ref irt) = email.in_reply_to {
        builder = builder.header(header::InReplyTo::from(irt.clone()));
    }
    if let Some(ref refs) = email.references {
        builder = builder.header(header::References::from(refs.clone()));
    }

    builder
        .body(email.body.clone())
        .map_err(|e| Error::Send(format!("Failed to build message: {e}")))
}

/// Fresh Message-ID in the sender's domain.
pub(crate) fn new_message_id(from: &str) -> String {
    let domain = from
        .rsplit_once('@')
        .map(|(_, d)| d.trim_end_matches('>'))
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    format!("{}@{domain}", uuid::Uuid::new_v4())
}

/// SMTP submission via lettre.
pub struct SmtpConnector {
    config: SmtpConfig,
}

impl SmtpConnector {
    pub fn new(config: SmtpConfig) -> Self {
        SmtpConnector { config }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let creds = Credentials::new(self.config.username.clone(), self.config.password.clone());
        let builder = if self.config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.server)
        }
        .map_err(|e| Error::Connection(format!("SMTP relay error: {e}")))?;

        Ok(builder.port(self.config.port).credentials(creds).build())
    }
}

#[async_trait]
impl OutboundConnector for SmtpConnector {
    async fn send_message(&self, email: &OutgoingMessage) -> Result<()> {
        let message_id = new_message_id(&email.from);
        let message = build_message(email, &message_id)?;

        log::info!(
            "Sending message {message_id} via {}:{}",
            self.config.server,
            self.config.port
        );
        self.transport()?
            .send(message)
            .await
            .map_err(|e| Error::Send(format!("SMTP send failed: {e}")))?;
        Ok(())
    }
}
