//! Form queue command implementation.

use chrono::Utc;
use serde_json::json;

use super::{parse_json, Context};
use crate::cli::args::{FormsCommands, OutputFormat};
use crate::error::FarmSyncError;
use crate::features::forms::FormQueue;
use crate::output::{format_forms, to_json};

/// Execute forms subcommands.
///
/// # Errors
///
/// Returns an error if the store fails or the form data is not valid JSON.
pub async fn forms(ctx: &Context, cmd: FormsCommands) -> Result<String, FarmSyncError> {
    let forms = FormQueue::new(ctx.store.clone());
    let format = ctx.format;

    match cmd {
        FormsCommands::Add { form_type, data } => {
            let item = forms
                .enqueue_form(&form_type, parse_json(&data, "form data")?)
                .await?;
            match format {
                OutputFormat::Json => to_json(&item),
                OutputFormat::Pretty => Ok(format!("Queued {} form {}", item.form_type, item.id())),
            }
        },
        FormsCommands::List { all } => {
            let items = if all {
                forms.list_all().await?
            } else {
                forms.list_unsynced().await?
            };
            format_forms(&items, Utc::now(), format)
        },
        FormsCommands::MarkSynced { id } => {
            if !forms.mark_synced(id).await? {
                return Err(FarmSyncError::NotFound(format!("form {id}")));
            }
            match format {
                OutputFormat::Json => to_json(&json!({"synced": id})),
                OutputFormat::Pretty => Ok(format!("Form {id} marked synced")),
            }
        },
        FormsCommands::Purge => {
            let count = forms.purge_synced().await?;
            match format {
                OutputFormat::Json => to_json(&json!({"purged": count})),
                OutputFormat::Pretty => Ok(format!("Purged {count} synced forms")),
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::Store;

    #[tokio::test]
    async fn test_mark_synced_hides_from_default_list() {
        let ctx = Context::new(
            Config::default(),
            Store::open_in_memory().unwrap(),
            OutputFormat::Json,
        );
        forms(
            &ctx,
            FormsCommands::Add {
                form_type: "expense".to_string(),
                data: r#"{"amount": 9}"#.to_string(),
            },
        )
        .await
        .unwrap();

        forms(&ctx, FormsCommands::MarkSynced { id: 1 }).await.unwrap();

        let pending: serde_json::Value =
            serde_json::from_str(&forms(&ctx, FormsCommands::List { all: false }).await.unwrap())
                .unwrap();
        let all: serde_json::Value =
            serde_json::from_str(&forms(&ctx, FormsCommands::List { all: true }).await.unwrap())
                .unwrap();
        assert_eq!(pending["count"], 0);
        assert_eq!(all["count"], 1);
    }
}
