use reqwest::{Client, Response};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct Email {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

impl Email {
    /// Body of the Mailtrap send request.
    pub fn payload(&self) -> Value {
        let to = self
            .to
            .iter()
            .map(|email| json!({"email": email}))
            .collect::<Vec<_>>();
        json!({
            "from": {"email" : self.from},
            "to": to,
            "subject": self.subject,
            "text": self.text,
            "html": self.html,
        })
    }
}

/// Send an email using the Mailtrap API.  A non-success status is not an
/// error here, check the response.
pub async fn send_email(
    client: &Client,
    api_url: &str,
    api_key: &str,
    email: &Email,
) -> Result<Response, reqwest::Error> {
    client
        .post(api_url)
        .header("Content-Type", "application/json")
        .header("Api-Token", api_key)
        .body(email.payload().to_string())
        .send()
        .await
}

#[cfg(test)]
mod tests {
    use std::{env, error::Error, path::Path};

    use super::*;

    #[test]
    fn payload_test() {
        let email = Email {
            from: "etl@example.com".into(),
            to: vec!["a@example.com".into(), "b@example.com".into()],
            subject: "Plain email test".into(),
            text: "hello".into(),
            html: None,
        };
        let payload = email.payload();
        assert_eq!(payload["from"]["email"], "etl@example.com");
        assert_eq!(payload["to"][1]["email"], "b@example.com");
        assert_eq!(payload["html"], Value::Null);
    }

    #[ignore]
    #[tokio::test]
    async fn email_test() -> Result<(), Box<dyn Error>> {
        dotenvy::from_path(Path::new(".env/test.env")).unwrap();
        let email = Email {
            from: env::var("EMAIL_FROM")?,
            to: vec![env::var("EMAIL_TO")?],
            subject: "Plain email test".into(),
            text: "This is a test email using Rust and Mailtrap API!".into(),
            html: None,
        };
        let res = send_email(
            &Client::new(),
            "https://send.api.mailtrap.io/api/send",
            &env::var("MAILTRAP_API_KEY")?,
            &email,
        )
        .await?;
        assert!(res.status().is_success());
        Ok(())
    }
}
