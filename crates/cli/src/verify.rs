use anyhow::Result;
use reqwest::Client;
use serde_json::json;

/// Verifies an LLM provider API key by making a minimal chat completion
/// request. Used by `wabridge verify` so a misconfigured key is caught
/// before the gateway is live and a user's first message silently fails.
pub async fn verify_api_key(provider: &str, api_key: &str, api_base: Option<&str>) -> Result<String> {
    let client = Client::new();

    let (url, headers, body) = match provider {
        "openai" | "openrouter" => {
            let base = api_base.unwrap_or("https://api.openai.com/v1");
            let url = format!("{}/chat/completions", base);
            let body = json!({
                "model": "gpt-3.5-turbo",
                "messages": [{"role": "user", "content": "Say 'ok' in one word"}],
                "max_tokens": 5
            });
            (url, vec![("Authorization", format!("Bearer {}", api_key))], body)
        }
        "anthropic" => {
            let url = "https://api.anthropic.com/v1/messages".to_string();
            let body = json!({
                "model": "claude-3-haiku-20240307",
                "max_tokens": 5,
                "messages": [{"role": "user", "content": "Say 'ok' in one word"}]
            });
            (
                url,
                vec![
                    ("x-api-key", api_key.to_string()),
                    ("anthropic-version", "2023-06-01".to_string()),
                ],
                body,
            )
        }
        "google" => {
            let url = format!(
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent?key={}",
                api_key
            );
            let body = json!({
                "contents": [{"parts": [{"text": "Say 'ok' in one word"}]}]
            });
            (url, vec![], body)
        }
        other => {
            return Err(anyhow::anyhow!("unknown provider: {other}"));
        }
    };

    let mut req = client.post(&url).json(&body);
    for (key, value) in &headers {
        req = req.header(*key, value);
    }

    let res = req.send().await?;
    let status = res.status();

    if status.is_success() {
        Ok(format!("{provider} API key is valid (HTTP {status})"))
    } else {
        let body = res.text().await.unwrap_or_default();
        Err(anyhow::anyhow!(
            "{provider} API key verification failed (HTTP {status}): {}",
            &body[..body.len().min(200)]
        ))
    }
}

/// Verifies the configured WhatsApp Cloud API credentials against the
/// phone-number metadata endpoint.
pub async fn verify_whatsapp_token(token: &str, phone_number_id: &str, api_base: Option<&str>) -> Result<String> {
    let client = Client::new();
    let base = api_base.unwrap_or("https://graph.facebook.com/v19.0");
    let url = format!("{base}/{phone_number_id}");

    let res = client.get(&url).bearer_auth(token).send().await?;
    let status = res.status();

    if status.is_success() {
        let data: serde_json::Value = res.json().await?;
        let display = data["display_phone_number"].as_str().unwrap_or("unknown");
        Ok(format!("WhatsApp number verified: {display}"))
    } else {
        Err(anyhow::anyhow!("WhatsApp credential verification failed (HTTP {status})"))
    }
}
