use std::fmt::Display;

use build_html::{escape_html, Html, HtmlContainer, TableCell, TableCellType, TableRow};
use jiff::Zoned;
use log::{error, info, warn};
use reqwest::Client;

use crate::{
    config::AlertSettings,
    pipeline::Stage,
    utils::send_email::{send_email, Email},
};

/// What went wrong, and where.
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub pipeline: String,
    pub stage: Stage,
    pub message: String,
    pub timestamp: Zoned,
}

impl FailureContext {
    pub fn new(pipeline: &str, stage: Stage, error: &dyn Display) -> FailureContext {
        FailureContext {
            pipeline: pipeline.to_string(),
            stage,
            message: error.to_string(),
            timestamp: Zoned::now(),
        }
    }

    pub fn subject(&self) -> String {
        format!("task {} in pipeline {} failed", self.stage, self.pipeline)
    }

    pub fn text(&self) -> String {
        format!(
            "The task {} in pipeline {} has failed at {}.\n\nError: {}\n",
            self.stage,
            self.pipeline,
            self.timestamp.strftime("%Y-%m-%d %H:%M:%S%:z"),
            self.message
        )
    }

    pub fn html(&self) -> String {
        let mut table = build_html::Table::new();
        table.add_header_row(vec!["Pipeline", "Stage", "Time", "Error"]);
        let mut row = TableRow::new();
        for value in [
            escape_html(&self.pipeline),
            self.stage.to_string(),
            self.timestamp.strftime("%Y-%m-%d %H:%M:%S%:z").to_string(),
            escape_html(&self.message),
        ] {
            row.add_cell(TableCell::new(TableCellType::Data).with_raw(value));
        }
        table.add_custom_body_row(row);
        format!(
            r#"<html>
    <head>
        <style>
            table {{
                border-collapse: collapse;
            }}
            th, td {{
                border: 1px solid black;
                padding: 8px;
                text-align: left;
            }}
        </style>
    </head>
    <body>
        <h3>{}</h3>
        {}
    </body>
</html>"#,
            escape_html(&self.subject()),
            table.to_html_string()
        )
    }
}

/// Sends failure alerts by email.  Never fails: a notification that can't be
/// sent must not hide the error that triggered it.
pub struct Notifier {
    settings: Option<AlertSettings>,
    client: Client,
}

impl Notifier {
    pub fn new(settings: Option<AlertSettings>, client: Client) -> Notifier {
        Notifier { settings, client }
    }

    /// Alerting is disabled if the settings are not in the environment.
    pub fn from_env() -> Notifier {
        let settings = match AlertSettings::from_env() {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!("failure alerts are disabled: {}", e);
                None
            }
        };
        Notifier::new(settings, Client::new())
    }

    pub fn email(&self, context: &FailureContext) -> Option<Email> {
        let settings = self.settings.as_ref()?;
        Some(Email {
            from: settings.sender.clone(),
            to: vec![settings.recipient.clone()],
            subject: context.subject(),
            text: context.text(),
            html: Some(context.html()),
        })
    }

    /// Returns true if the alert was accepted by the mail service.
    pub async fn notify(&self, context: &FailureContext) -> bool {
        let (Some(settings), Some(email)) = (self.settings.as_ref(), self.email(context)) else {
            warn!("not sending alert: {}", context.subject());
            return false;
        };
        match send_email(&self.client, &settings.api_url, &settings.credential, &email).await {
            Ok(response) if response.status().is_success() => {
                info!("alert sent to {}", settings.recipient);
                true
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!("failed to send alert, status {}: {}", status, body);
                false
            }
            Err(e) => {
                error!("failed to send alert: {}", e);
                false
            }
        }
    }
}
