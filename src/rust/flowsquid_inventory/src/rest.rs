use crate::InventoryError;
use serde::de::DeserializeOwned;

const DEVICES_PATH: &str = "/api/v1/devices";

/// Builds the device-list URL from a configured base, tolerating
/// whitespace, trailing slashes and bases that already name the API.
pub(crate) fn devices_url(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.ends_with(DEVICES_PATH) {
        base.to_string()
    } else if base.ends_with("/api/v1") {
        format!("{base}/devices")
    } else {
        format!("{base}{DEVICES_PATH}")
    }
}

/// Issues a GET and decodes the body as a JSON array of `T`.
/// Transport failures and non-2xx answers are fetch failures; a body
/// that is not the expected JSON is a parse failure.
pub(crate) async fn request_get_vec<T>(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<T>, InventoryError>
where
    T: DeserializeOwned,
{
    let res = client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| InventoryError::FetchFailed(e.to_string()))?;

    let status = res.status();
    if !status.is_success() {
        return Err(InventoryError::BadStatus(status.as_u16()));
    }

    let body = res
        .bytes()
        .await
        .map_err(|e| InventoryError::FetchFailed(e.to_string()))?;
    serde_json::from_slice::<Vec<T>>(&body).map_err(|e| InventoryError::ParseFailed(e.to_string()))
}
