//! Notification service: persist every message, e-mail it when enabled

use crate::clients::MailTransport;
use crate::error::Result;
use crate::store::RecordStore;
use approval_types::{Notification, User};
use std::sync::Arc;

pub struct Notifier {
    store: Arc<dyn RecordStore>,
    mailer: Option<Arc<dyn MailTransport>>,
}

impl Notifier {
    /// Notifier that only persists notifications
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store, mailer: None }
    }

    /// Also deliver every notification by e-mail
    pub fn with_mailer(mut self, mailer: Arc<dyn MailTransport>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn email_enabled(&self) -> bool {
        self.mailer.is_some()
    }

    /// Store a notification from `sender` to `recipient` and e-mail it.
    ///
    /// Storage failures are returned. Delivery failures are logged only.
    pub async fn notify(&self, sender: &User, recipient: &User, message: String) -> Result<Notification> {
        let notification = Notification::new(sender.id.clone(), recipient.id.clone(), message);
        self.store.insert_notification(&notification).await?;

        if let Some(mailer) = &self.mailer {
            let subject = format!("Approval notification from {}", sender.username);
            if let Err(e) = mailer.send(&recipient.email, &subject, &notification.message).await {
                log::warn!("Failed to e-mail {} <{}>: {}", recipient.username, recipient.email, e);
            }
        }

        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApprovalError;
    use crate::store::InMemoryStore;
    use approval_types::UserId;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl MailTransport for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
            self.sent.lock().unwrap().push((to.to_string(), subject.to_string()));
            if self.fail {
                return Err(ApprovalError::TransientIo("connection refused".to_string()));
            }
            Ok(())
        }
    }

    fn users() -> (User, User) {
        (
            User::new(UserId::new("U1"), "admin", "admin@example.com"),
            User::new(UserId::new("U2"), "reviewer", "reviewer@example.com"),
        )
    }

    #[tokio::test]
    async fn test_persists_without_mail_when_disabled() {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Notifier::new(store.clone());
        let (sender, recipient) = users();

        notifier.notify(&sender, &recipient, "hello".to_string()).await.unwrap();

        let stored = store.notifications();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].assigned_by, sender.id);
        assert_eq!(stored[0].assigned_to, recipient.id);
        assert!(!stored[0].is_read);
        assert!(!notifier.email_enabled());
    }

    #[tokio::test]
    async fn test_mails_recipient_when_enabled() {
        let store = Arc::new(InMemoryStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Notifier::new(store.clone()).with_mailer(mailer.clone());
        let (sender, recipient) = users();

        notifier.notify(&sender, &recipient, "hello".to_string()).await.unwrap();

        let sent = mailer.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![(
            "reviewer@example.com".to_string(),
            "Approval notification from admin".to_string(),
        )]);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_not_fatal() {
        let store = Arc::new(InMemoryStore::new());
        let mailer = Arc::new(RecordingMailer { fail: true, ..Default::default() });
        let notifier = Notifier::new(store.clone()).with_mailer(mailer);
        let (sender, recipient) = users();

        let result = notifier.notify(&sender, &recipient, "hello".to_string()).await;

        assert!(result.is_ok());
        assert_eq!(store.notifications().len(), 1);
    }
}
