use std::sync::Arc;

use careers_http::{ApiClient, ApiError, MemoryCredentialStore, TokenPair};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let access = std::env::var("CAREERS_ACCESS_TOKEN")?;
    let refresh = std::env::var("CAREERS_REFRESH_TOKEN")?;

    let store = Arc::new(MemoryCredentialStore::with_tokens(TokenPair::new(
        access, refresh,
    )));
    let api = ApiClient::from_env(store).map_err(anyhow::Error::msg)?;

    let jobs = api.get("/jobs?page=1").await?;
    println!("{}", jobs.body);

    match api.post("/applications", json!({ "jobId": 1 })).await {
        Ok(response) if response.redirected_to().is_some() => {
            println!("account pending approval");
        }
        Ok(response) => println!("applied: {}", response.body),
        Err(err @ ApiError::RateLimitExceeded { .. }) => println!("slow down: {err}"),
        Err(err) if err.is_auth_error() => println!("please sign in again: {err}"),
        Err(err) => return Err(err.into()),
    }

    Ok(())
}
