/// マーケットプレイス公式Browse APIのクライアント。
///
/// キーワード検索を1ページ分実行し、API固有のフィールドを返します。
/// タイムアウトとサービストークンをサポートします。
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::extract::ScanMode;

/// Browse APIが返すHTTPレベルの失敗。
///
/// ステータスコードを型として保持するため、呼び出し側のリトライ判定が
/// 429/5xxを一時的エラーとして分類できます。
#[derive(Debug, Error)]
pub enum BrowseApiError {
    #[error("browse API returned {code}: {body}")]
    Status { code: StatusCode, body: String },
}

/// Browse APIが返す1アイテム。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiItemSummary {
    pub title: Option<String>,
    pub item_web_url: Option<String>,
    pub price: Option<ApiPrice>,
    #[serde(default)]
    pub shipping_options: Vec<ApiShippingOption>,
    pub bid_count: Option<u32>,
    pub item_end_date: Option<String>,
    pub image: Option<ApiImage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiPrice {
    pub value: String,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiShippingOption {
    pub shipping_cost: Option<ApiPrice>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiImage {
    pub image_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    item_summaries: Vec<ApiItemSummary>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

/// Browse APIクライアントの設定。
#[derive(Debug, Clone)]
pub struct BrowseApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
}

/// Browse APIとの通信を管理するクライアント。
#[derive(Debug, Clone)]
pub struct BrowseApiClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl BrowseApiClient {
    /// 新しいBrowse APIクライアントを作成する。
    ///
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返します。
    pub fn new(config: BrowseApiConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()
            .context("failed to build browse API HTTP client")?;

        let base_url = Url::parse(&config.base_url).context("invalid browse API base URL")?;

        Ok(Self {
            client,
            base_url,
            token: config.token,
        })
    }

    /// キーワード検索を1ページ分実行する。
    ///
    /// APIが非成功ステータス、またはボディ内エラーを返した場合は、
    /// 上流のメッセージを含むドメインエラーを返します。
    ///
    /// # Errors
    /// HTTPリクエスト、レスポンスのパース、または上流エラーの場合。
    pub async fn search(
        &self,
        keyword: &str,
        mode: ScanMode,
        limit: usize,
    ) -> Result<Vec<ApiItemSummary>> {
        let mut url = self
            .base_url
            .join("buy/browse/v1/item_summary/search")
            .context("failed to build search URL")?;

        {
            let mut query_pairs = url.query_pairs_mut();
            query_pairs.append_pair("q", keyword);
            query_pairs.append_pair("limit", &limit.to_string());
            if mode == ScanMode::Sold {
                query_pairs.append_pair("filter", "soldItemsOnly:true");
            }
        }

        debug!(%keyword, mode = mode.as_str(), limit, "searching browse API");

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("browse API search request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(BrowseApiError::Status {
                code: status,
                body: error_body.chars().take(300).collect(),
            }
            .into());
        }

        let body: SearchResponse = response
            .json()
            .await
            .context("failed to deserialize browse API search response")?;

        if let Some(first) = body.errors.first() {
            let message = first.message.as_deref().unwrap_or("unspecified upstream error");
            anyhow::bail!("browse API reported failure: {message}");
        }

        Ok(body.item_summaries)
    }

    /// ヘルスチェック相当の軽い呼び出し。
    ///
    /// # Errors
    /// リクエストが失敗した場合、またはサーバーがエラー状態を返した場合。
    pub async fn ping(&self) -> Result<()> {
        self.client
            .get(self.base_url.clone())
            .send()
            .await
            .context("browse API ping request failed")?;
        Ok(())
    }
}
