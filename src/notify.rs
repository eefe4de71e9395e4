use crate::error::{Error, Result};
use crate::DocumentId;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    /// A recipient has been given access (signature request or cc copy).
    Sent,
    Declined,
    Completed,
}

impl NotificationEvent {
    fn template(self) -> &'static str {
        match self {
            Self::Sent => "signature_request",
            Self::Declined => "document_declined",
            Self::Completed => "document_completed",
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct NotificationPayload {
    pub document_id: DocumentId,
    pub document_title: String,
    pub recipient_name: String,
    pub signing_link: Option<String>,
    pub view_only: bool,
    pub reason: Option<String>,
    pub signed_file_url: Option<String>,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, email: &str, event: NotificationEvent, payload: &NotificationPayload) -> Result<()>;
}

#[async_trait::async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, msg: lettre::Message) -> Result<()>;
}

#[async_trait::async_trait]
impl EmailTransport for lettre::transport::stub::AsyncStubTransport {
    async fn send(&self, msg: lettre::Message) -> Result<()> {
        match lettre::AsyncTransport::send(self, msg).await {
            Ok(()) => Ok(()),
            Err(err) => Err(Error::NotifyFailure(format!("Unable to send email: {}", err))),
        }
    }
}

#[async_trait::async_trait]
impl EmailTransport for lettre::transport::file::AsyncFileTransport<lettre::Tokio1Executor> {
    async fn send(&self, msg: lettre::Message) -> Result<()> {
        match lettre::AsyncTransport::send(self, msg).await {
            Ok(_) => Ok(()),
            Err(err) => Err(Error::NotifyFailure(format!("Unable to save email to file: {}", err))),
        }
    }
}

#[async_trait::async_trait]
impl EmailTransport for lettre::transport::smtp::AsyncSmtpTransport<lettre::Tokio1Executor> {
    async fn send(&self, msg: lettre::Message) -> Result<()> {
        match lettre::AsyncTransport::send(self, msg).await {
            Ok(_) => Ok(()),
            Err(err) => Err(Error::NotifyFailure(format!("Unable to send email with SMTP: {}", err))),
        }
    }
}

type EmailTransportType = Box<dyn EmailTransport>;

pub fn smtp_transport(
    conf: &crate::config::SMTPConfig,
) -> Result<lettre::transport::smtp::AsyncSmtpTransport<lettre::Tokio1Executor>> {
    let mut smtp_transport_builder =
        lettre::transport::smtp::AsyncSmtpTransport::<lettre::Tokio1Executor>::builder_dangerous(&conf.server)
            .port(conf.port);
    if conf.use_tls {
        let tls = lettre::transport::smtp::client::TlsParameters::new(conf.server.clone())
            .map_err(|err| Error::Config(format!("Unable to setup SMTP TLS parameters: {}", err)))?;
        smtp_transport_builder = smtp_transport_builder.tls(lettre::transport::smtp::client::Tls::Required(tls));
    }
    if let Some(auth) = &conf.auth {
        smtp_transport_builder = smtp_transport_builder.credentials(
            lettre::transport::smtp::authentication::Credentials::new(auth.username.clone(), auth.password.clone()),
        )
    }
    Ok(smtp_transport_builder.build())
}

pub struct EmailNotifier {
    transport: EmailTransportType,
    templates: tera::Tera,
    from: lettre::message::Mailbox,
    reply_to: Option<lettre::message::Mailbox>,
}

fn parse_mailbox(value: &str) -> Result<lettre::message::Mailbox> {
    value
        .parse()
        .map_err(|err| Error::Config(format!("Unable to parse mailbox '{}': {}", value, err)))
}

impl EmailNotifier {
    pub fn new(
        transport: EmailTransportType, templates_glob: &str, from: &str, reply_to: Option<&str>,
    ) -> Result<Self> {
        let mut templates = match tera::Tera::new(templates_glob) {
            Ok(t) => t,
            Err(err) => return Err(Error::Config(format!("Unable to parse email templates: {}", err))),
        };
        templates.autoescape_on(vec![".html"]);

        Ok(Self {
            transport,
            templates,
            from: parse_mailbox(from)?,
            reply_to: reply_to.map(parse_mailbox).transpose()?,
        })
    }

    /// SMTP when configured, otherwise emails are written to `files_dir/outbox`.
    pub fn from_config(config: &crate::Config) -> Result<Self> {
        let transport: EmailTransportType = match &config.smtp {
            Some(smtp) => Box::new(smtp_transport(smtp)?),
            None => {
                let outbox = config.files_dir.join("outbox");
                std::fs::create_dir_all(&outbox)?;
                warn!("No SMTP server configured, writing emails to {}", outbox.display());
                Box::new(lettre::transport::file::AsyncFileTransport::<lettre::Tokio1Executor>::new(outbox))
            }
        };
        let glob = format!("{}/**/*", config.templates_dir.trim_end_matches('/'));
        Self::new(transport, &glob, &config.mail_from, config.reply_to.as_deref())
    }

    fn subject(event: NotificationEvent, payload: &NotificationPayload) -> String {
        match event {
            NotificationEvent::Sent if payload.view_only => format!("Document shared with you: {}", payload.document_title),
            NotificationEvent::Sent => format!("Your signature requested on: {}", payload.document_title),
            NotificationEvent::Declined => format!("Signing declined: {}", payload.document_title),
            NotificationEvent::Completed => format!("Completed: {}", payload.document_title),
        }
    }

    pub fn build_message(
        &self, email: &str, event: NotificationEvent, payload: &NotificationPayload,
    ) -> Result<lettre::Message> {
        let context = tera::Context::from_serialize(payload)?;
        let name = event.template();
        let email_html = self.templates.render(&format!("{}.html", name), &context)?;
        let email_txt = self.templates.render(&format!("{}.txt", name), &context)?;

        let to = lettre::message::Mailbox {
            name: Some(payload.recipient_name.clone()),
            email: match email.parse() {
                Ok(m) => m,
                Err(err) => return Err(Error::NotifyFailure(format!("Unable to parse email: {}", err))),
            },
        };

        let mut builder = lettre::message::Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(Self::subject(event, payload));
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }
        Ok(builder.multipart(lettre::message::MultiPart::alternative_plain_html(email_txt, email_html))?)
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, email: &str, event: NotificationEvent, payload: &NotificationPayload) -> Result<()> {
        let m = self.build_message(email, event, payload)?;
        self.transport.send(m).await
    }
}
