//! SMTP credential endpoints

use mailbridge_shared::StoreResult;
use tracing::info;

use crate::client::{transport_error, MailgunClient};

impl MailgunClient {
    /// Create an SMTP login on the sending domain
    ///
    /// If the login already exists its password is reset to `secret`.
    pub async fn create_credential(&self, login: &str, secret: &str) -> StoreResult<()> {
        let request = self
            .post(&format!("domains/{}/credentials", self.domain()))
            .form(&[("login", login), ("password", secret)]);

        match self.send(request).await {
            Ok(response) => {
                response.bytes().await.map_err(transport_error)?;
                info!(login = %login, domain = %self.domain(), "Created SMTP credential");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                info!(login = %login, "SMTP credential exists, resetting password");
                self.update_credential(login, secret).await
            }
            Err(e) => Err(e),
        }
    }

    /// Reset the password of an existing SMTP login
    pub async fn update_credential(&self, login: &str, secret: &str) -> StoreResult<()> {
        let request = self
            .put(&format!("domains/{}/credentials/{}", self.domain(), login))
            .form(&[("password", secret)]);

        let response = self.send(request).await?;
        response.bytes().await.map_err(transport_error)?;

        info!(login = %login, domain = %self.domain(), "Updated SMTP credential");
        Ok(())
    }
}
