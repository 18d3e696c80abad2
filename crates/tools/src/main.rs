use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use catalog::extent::summarize_geojson;
use catalog::{Catalog, Plan, User, Visibility};
use catalog_sqlite::SqliteCatalogStore;
use foundation::UserId;
use serde_json::json;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/catalog.db?mode=rwc";

fn main() {
    if let Err(e) = real_main() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<(), String> {
    let mut args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        return Err(usage());
    }

    let cmd = args[1].clone();
    args.drain(0..2);

    match cmd.as_str() {
        "summarize" => cmd_summarize(args),
        "set-plan" | "sweep" | "show-user" => {
            let (database_url, rest) = split_database_url(args)?;
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| format!("start runtime: {e}"))?;
            rt.block_on(async {
                let catalog = open_catalog(&database_url).await?;
                match cmd.as_str() {
                    "set-plan" => cmd_set_plan(&catalog, rest).await,
                    "sweep" => cmd_sweep(&catalog, rest).await,
                    _ => cmd_show_user(&catalog, rest).await,
                }
            })
        }
        _ => Err(usage()),
    }
}

/// Pull `--database-url URL` out of the arguments, falling back to
/// `DATABASE_URL` and then the server default.
fn split_database_url(args: Vec<String>) -> Result<(String, Vec<String>), String> {
    let mut url = env::var("DATABASE_URL").ok();
    let mut rest = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--database-url" => {
                url = Some(
                    iter.next()
                        .ok_or_else(|| "--database-url requires a value".to_string())?,
                );
            }
            s if s.starts_with('-') => {
                return Err(format!("unknown arg: {s}\n\n{}", usage()));
            }
            _ => rest.push(arg),
        }
    }
    Ok((
        url.unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
        rest,
    ))
}

async fn open_catalog(database_url: &str) -> Result<Catalog, String> {
    let store = SqliteCatalogStore::open(database_url)
        .await
        .map_err(|e| format!("open {database_url}: {e}"))?;
    Ok(Catalog::new(Arc::new(store)))
}

async fn find_user(catalog: &Catalog, key: &str) -> Result<User, String> {
    let found = match key.parse::<UserId>() {
        Ok(id) => catalog.store().user(&id).await,
        Err(_) => catalog.store().user_by_email(key).await,
    }
    .map_err(|e| e.to_string())?;
    found.ok_or_else(|| format!("no user matches {key:?}"))
}

async fn cmd_set_plan(catalog: &Catalog, args: Vec<String>) -> Result<(), String> {
    // catalogctl set-plan <user-id|email> <free|paid>
    if args.len() != 2 {
        return Err(usage());
    }
    let plan: Plan = args[1].parse()?;
    let user = find_user(catalog, &args[0]).await?;
    let change = catalog
        .change_plan(&user.id, plan)
        .await
        .map_err(|e| e.to_string())?;
    println!(
        "{}: {} -> {} ({} layer(s) published)",
        user.username, change.previous, change.current, change.published_layers
    );
    Ok(())
}

async fn cmd_sweep(catalog: &Catalog, args: Vec<String>) -> Result<(), String> {
    if !args.is_empty() {
        return Err(usage());
    }
    let published = catalog.reconcile_plans().await.map_err(|e| e.to_string())?;
    println!("published {published} private layer(s) owned by free users");
    Ok(())
}

async fn cmd_show_user(catalog: &Catalog, args: Vec<String>) -> Result<(), String> {
    if args.len() != 1 {
        return Err(usage());
    }
    let user = find_user(catalog, &args[0]).await?;
    let layers = catalog
        .store()
        .layers_by_owner(&user.id)
        .await
        .map_err(|e| e.to_string())?;
    let private = layers
        .iter()
        .filter(|l| l.visibility == Visibility::Private)
        .count();
    let out = json!({
        "id": user.id,
        "email": user.email,
        "username": user.username,
        "provider": user.provider,
        "plan": user.plan,
        "is_active": user.is_active,
        "layers": layers.len(),
        "private_layers": private,
    });
    let text = serde_json::to_string_pretty(&out).map_err(|e| e.to_string())?;
    println!("{text}");
    Ok(())
}

fn cmd_summarize(args: Vec<String>) -> Result<(), String> {
    // catalogctl summarize <input.geojson>
    if args.len() != 1 {
        return Err(usage());
    }
    let path = PathBuf::from(&args[0]);
    let bytes = fs::read(&path).map_err(|e| format!("read {path:?}: {e}"))?;
    let doc: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| format!("parse {path:?}: {e}"))?;
    let summary = summarize_geojson(&doc).map_err(|e| e.to_string())?;
    let out = json!({
        "feature_count": summary.feature_count,
        "extent": summary.extent,
    });
    let text = serde_json::to_string_pretty(&out).map_err(|e| e.to_string())?;
    println!("{text}");
    Ok(())
}

fn usage() -> String {
    let exe = env::args().next().unwrap_or_else(|| "catalogctl".to_string());
    format!(
        "Usage:\n  {exe} set-plan <user-id|email> <free|paid> [--database-url URL]\n  {exe} sweep [--database-url URL]\n  {exe} show-user <user-id|email> [--database-url URL]\n  {exe} summarize <input.geojson>\n\nNotes:\n- The database defaults to $DATABASE_URL, then {DEFAULT_DATABASE_URL}.\n- Downgrading to free publishes the user's private layers in the same transaction.\n- `sweep` publishes private layers of every free user, as the server's periodic sweep does.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_url_flag_is_extracted() {
        let (url, rest) = split_database_url(vec![
            "ada@example.com".to_string(),
            "--database-url".to_string(),
            "sqlite::memory:".to_string(),
            "paid".to_string(),
        ])
        .unwrap();
        assert_eq!(url, "sqlite::memory:");
        assert_eq!(rest, vec!["ada@example.com".to_string(), "paid".to_string()]);
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(split_database_url(vec!["--force".to_string()]).is_err());
        assert!(split_database_url(vec!["--database-url".to_string()]).is_err());
    }

    #[test]
    fn set_plan_publishes_through_the_store() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let catalog = open_catalog("sqlite::memory:").await.unwrap();
            let user = catalog
                .sign_in(catalog::IdentityProfile {
                    provider: catalog::OAuthProvider::Google,
                    subject: "s".to_string(),
                    email: Some("ada@example.com".to_string()),
                    username_hint: None,
                    full_name: None,
                    avatar_url: None,
                })
                .await
                .unwrap();
            cmd_set_plan(&catalog, vec![user.id.to_string(), "paid".to_string()])
                .await
                .unwrap();
            let paid = catalog.user(&user.id).await.unwrap();
            assert_eq!(paid.plan, Plan::Paid);
            let secret = catalog
                .create_layer(
                    &paid,
                    catalog::LayerDraft {
                        title: "Secret wells".to_string(),
                        visibility: Some(Visibility::Private),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            assert_eq!(secret.visibility, Visibility::Private);

            cmd_set_plan(&catalog, vec!["ada@example.com".to_string(), "free".to_string()])
                .await
                .unwrap();
            assert_eq!(catalog.user(&user.id).await.unwrap().plan, Plan::Free);
            let layers = catalog.store().layers_by_owner(&user.id).await.unwrap();
            assert_eq!(layers.len(), 1);
            assert_eq!(layers[0].visibility, Visibility::Public);
            assert!(catalog.read_layer(None, &secret.id).await.is_ok());

            let missing = cmd_set_plan(&catalog, vec!["nobody@example.com".to_string(), "paid".to_string()]).await;
            assert!(missing.is_err());
        });
    }
}
