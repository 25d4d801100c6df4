//! [`MapSurface`] over the W3C WebDriver protocol.
//!
//! Talks plain HTTP to a WebDriver server (chromedriver, geckodriver or a
//! Selenium grid). Every selector comes from [`Selectors`], so a change in
//! the live map's markup is a configuration change.
//!
//! See <https://www.w3.org/TR/webdriver2/>

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use traffic_sweep_geography_models::PanDirection;
use traffic_sweep_source::retry::RetryPolicy;

use crate::{DetailField, ElementRef, MapSurface, MarkerHandle, MarkerKind, SurfaceError};

/// Key under which WebDriver serializes element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const FORCE_CLICK_SCRIPT: &str = "arguments[0].click();";

const SHADOW_CLICK_SCRIPT: &str = "const target = arguments[0].shadowRoot \
    && arguments[0].shadowRoot.querySelector(arguments[1]); \
    if (target) { target.click(); return true; } return false;";

/// CSS selectors for every element the surface touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    /// Map container; receives move signals.
    pub map: String,
    /// Alert and cluster markers.
    pub markers: String,
    /// Class marking a single alert marker.
    pub alert_class: String,
    /// Class marking a cluster marker.
    pub cluster_class: String,
    /// Coordinate display.
    pub location: String,
    /// Detail view container.
    pub detail: String,
    /// Detail view type heading.
    pub detail_type: String,
    /// Detail view address.
    pub detail_address: String,
    /// Detail view relative time.
    pub detail_time: String,
    /// Detail view reporter name.
    pub detail_reporter: String,
    /// Detail view close button.
    pub close_detail: String,
    /// Recurring tour overlay.
    pub overlay: String,
    /// Close button of the recurring overlay.
    pub overlay_close: String,
    /// Elements clicked once after loading, in order.
    pub initial_clicks: Vec<String>,
    /// Shadow-DOM host of the alert filter toggle.
    pub filter_toggle_host: String,
    /// Target inside the toggle's shadow root.
    pub filter_toggle_target: String,
    /// Elements clicked once after the toggle, in order.
    pub closing_clicks: Vec<String>,
    /// Zoom-in control.
    pub zoom_in: String,
}

impl Default for Selectors {
    fn default() -> Self {
        let detail = "div.wm-alert-details";
        Self {
            map: "#map".to_string(),
            markers: "div.leaflet-marker-icon.wm-alert-icon.leaflet-interactive, \
                      div.leaflet-marker-icon.wm-alert-cluster-icon.leaflet-interactive"
                .to_string(),
            alert_class: "wm-alert-icon".to_string(),
            cluster_class: "wm-alert-cluster-icon".to_string(),
            location: "div.wm-attribution-control__latlng > span".to_string(),
            detail: detail.to_string(),
            detail_type: format!("{detail} > h4"),
            detail_address: format!("{detail} > div.wm-alert-details__address"),
            detail_time: format!(
                "{detail} > div.wm-alert-details__reporter > div > div.wm-alert-details__time"
            ),
            detail_reporter: format!(
                "{detail} > div.wm-alert-details__reporter > div > div.wm-alert-details__reporter-name > b"
            ),
            close_detail: "#map div.leaflet-popup-pane > div > a".to_string(),
            overlay: "div.waze-tour-step__overlay".to_string(),
            overlay_close: "button.waze-tour-step__close-button".to_string(),
            initial_clicks: vec![
                "#root > div.wz-downloadbar > button".to_string(),
                "div.waze-tooltip.waze-tour-tooltip__root > button".to_string(),
                "#onetrust-accept-btn-handler".to_string(),
                "#map > div.wm-cards.is-destination > div.wm-card.is-routing > div > div.wm-routing__title > button"
                    .to_string(),
            ],
            filter_toggle_host: "div.wz-popup-overlay.wz-sidebar-overlay.wz-sidebar-open \
                                 ul:nth-child(2) li:nth-child(3) wz-toggle-switch"
                .to_string(),
            filter_toggle_target: "span > label > span".to_string(),
            closing_clicks: vec![
                "body > div.wz-popup-overlay.wz-sidebar-overlay.wz-sidebar-open > div > div > button"
                    .to_string(),
            ],
            zoom_in: "a.leaflet-control-zoom-in".to_string(),
        }
    }
}

impl Selectors {
    const fn for_field(&self, field: DetailField) -> &String {
        match field {
            DetailField::Type => &self.detail_type,
            DetailField::Address => &self.detail_address,
            DetailField::ReportTime => &self.detail_time,
            DetailField::Reporter => &self.detail_reporter,
        }
    }

    /// Classifies a marker by its `class` attribute.
    #[must_use]
    pub fn marker_kind(&self, class: &str) -> Option<MarkerKind> {
        let has = |name: &str| class.split_whitespace().any(|c| c == name);
        if has(&self.cluster_class) {
            Some(MarkerKind::Cluster)
        } else if has(&self.alert_class) {
            Some(MarkerKind::Alert)
        } else {
            None
        }
    }
}

/// Connection and page settings for [`WebDriverSurface`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDriverSettings {
    /// WebDriver server URL.
    pub endpoint: String,
    /// Map page to open.
    pub page_url: String,
    /// Browser command-line arguments.
    pub browser_args: Vec<String>,
    /// HTTP timeout for a single WebDriver command, in seconds.
    pub command_timeout_secs: u64,
    /// Wait after navigation before preparing the page.
    pub page_load_ms: u64,
    /// How long one-time preparation waits for each element.
    pub prepare_wait_ms: u64,
    /// Poll interval while waiting for an element.
    pub poll_interval_ms: u64,
    /// Zoom-in clicks after preparation.
    pub zoom_clicks: u32,
    /// Element selectors.
    pub selectors: Selectors,
}

impl Default for WebDriverSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9515".to_string(),
            page_url: "https://www.waze.com/es-419/live-map/".to_string(),
            browser_args: [
                "--headless",
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--window-size=1920,1080",
                "--lang=es-419",
                "--disable-extensions",
                "--disable-popup-blocking",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            command_timeout_secs: 30,
            page_load_ms: 5000,
            prepare_wait_ms: 3000,
            poll_interval_ms: 250,
            zoom_clicks: 1,
            selectors: Selectors::default(),
        }
    }
}

/// WebDriver key code for a pan direction.
#[must_use]
pub const fn arrow_key(direction: PanDirection) -> &'static str {
    match direction {
        PanDirection::Up => "\u{E013}",
        PanDirection::Down => "\u{E015}",
        PanDirection::Left => "\u{E012}",
        PanDirection::Right => "\u{E014}",
    }
}

/// Maps a WebDriver error payload (`{"error", "message"}`) to a
/// [`SurfaceError`].
#[must_use]
pub fn classify_error(value: &Value) -> SurfaceError {
    let error = value["error"].as_str().unwrap_or("unknown error");
    let message = value["message"]
        .as_str()
        .and_then(|m| m.lines().next())
        .unwrap_or_default()
        .to_string();

    match error {
        "stale element reference" => SurfaceError::Stale,
        "element click intercepted" => SurfaceError::Intercepted(message),
        "element not interactable" => SurfaceError::NotInteractable(message),
        "no such element" => SurfaceError::NotFound(message),
        "timeout" | "script timeout" => SurfaceError::Timeout(message),
        "invalid session id" | "session not created" | "unknown command" => {
            SurfaceError::Session(format!("{error}: {message}"))
        }
        _ => SurfaceError::Command(format!("{error}: {message}")),
    }
}

fn element_ref(value: &Value) -> Option<ElementRef> {
    value[ELEMENT_KEY].as_str().map(|id| ElementRef(id.to_string()))
}

fn element_arg(element: &ElementRef) -> Value {
    json!({ ELEMENT_KEY: element.0 })
}

/// A live browser session showing the traffic map.
pub struct WebDriverSurface {
    client: reqwest::Client,
    settings: WebDriverSettings,
    session_url: String,
}

impl WebDriverSurface {
    /// Opens a new browser session.
    ///
    /// # Errors
    ///
    /// Returns [`SurfaceError::Session`] if the server refuses the session
    /// and [`SurfaceError::Http`] if it cannot be reached.
    pub async fn connect(settings: WebDriverSettings) -> Result<Self, SurfaceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.command_timeout_secs))
            .build()?;

        let endpoint = settings.endpoint.trim_end_matches('/');
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": settings.browser_args },
                }
            }
        });
        let value = execute(
            &client,
            Method::POST,
            &format!("{endpoint}/session"),
            Some(capabilities),
        )
        .await?;

        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| SurfaceError::Session("response carried no sessionId".to_string()))?;
        log::info!("WebDriver session {session_id} opened at {endpoint}");

        Ok(Self {
            session_url: format!("{endpoint}/session/{session_id}"),
            client,
            settings,
        })
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, SurfaceError> {
        let url = if path.is_empty() {
            self.session_url.clone()
        } else {
            format!("{}/{path}", self.session_url)
        };
        execute(&self.client, method, &url, body).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, SurfaceError> {
        self.command(Method::POST, path, Some(body)).await
    }

    async fn get(&self, path: &str) -> Result<Value, SurfaceError> {
        self.command(Method::GET, path, None).await
    }

    async fn find(&self, css: &str) -> Result<ElementRef, SurfaceError> {
        let value = self
            .post("element", json!({"using": "css selector", "value": css}))
            .await?;
        element_ref(&value).ok_or_else(|| SurfaceError::NotFound(css.to_string()))
    }

    async fn find_all(&self, css: &str) -> Result<Vec<ElementRef>, SurfaceError> {
        let value = self
            .post("elements", json!({"using": "css selector", "value": css}))
            .await?;
        Ok(value
            .as_array()
            .map(|items| items.iter().filter_map(element_ref).collect())
            .unwrap_or_default())
    }

    async fn text(&self, element: &ElementRef) -> Result<String, SurfaceError> {
        let value = self.get(&format!("element/{}/text", element.0)).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> Result<String, SurfaceError> {
        let value = self
            .get(&format!("element/{}/attribute/{name}", element.0))
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn displayed(&self, element: &ElementRef) -> Result<bool, SurfaceError> {
        let value = self.get(&format!("element/{}/displayed", element.0)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn click_element(&self, element: &ElementRef) -> Result<(), SurfaceError> {
        self.post(&format!("element/{}/click", element.0), json!({}))
            .await
            .map(|_| ())
    }

    async fn script_click(&self, element: &ElementRef) -> Result<(), SurfaceError> {
        self.post(
            "execute/sync",
            json!({"script": FORCE_CLICK_SCRIPT, "args": [element_arg(element)]}),
        )
        .await
        .map(|_| ())
    }

    async fn find_displayed(&self, css: &str) -> Result<ElementRef, SurfaceError> {
        let element = self.find(css).await?;
        if self.displayed(&element).await? {
            Ok(element)
        } else {
            Err(SurfaceError::NotFound(format!("{css} (hidden)")))
        }
    }

    /// Polls until `css` matches a displayed element or `timeout` passes.
    async fn wait_for(&self, css: &str, timeout: Duration) -> Result<ElementRef, SurfaceError> {
        let poll = self.settings.poll_interval_ms.max(1);
        let polls = u32::try_from(
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX) / poll,
        )
        .unwrap_or(u32::MAX);
        let policy = RetryPolicy::fixed(polls, poll);
        let this = self;

        traffic_sweep_source::retry::retry(
            &policy,
            css,
            |e: &SurfaceError| !e.is_structural(),
            |_| this.find_displayed(css),
        )
        .await
        .map_err(|e| match e {
            SurfaceError::NotFound(_) | SurfaceError::Stale => {
                SurfaceError::Timeout(format!("{css} after {timeout:?}"))
            }
            other => other,
        })
    }

    /// Waits for `css` and clicks it, falling back to a script click.
    /// Returns whether anything was clicked.
    async fn click_if_present(&self, css: &str, timeout: Duration) -> Result<bool, SurfaceError> {
        let element = match self.wait_for(css, timeout).await {
            Ok(element) => element,
            Err(e) if e.is_structural() => return Err(e),
            Err(_) => return Ok(false),
        };
        match self.click_element(&element).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_structural() => Err(e),
            Err(_) => self.script_click(&element).await.map(|()| true),
        }
    }

    async fn toggle_filter(&self, timeout: Duration) -> Result<bool, SurfaceError> {
        let selectors = &self.settings.selectors;
        let host = match self.wait_for(&selectors.filter_toggle_host, timeout).await {
            Ok(host) => host,
            Err(e) if e.is_structural() => return Err(e),
            Err(_) => return Ok(false),
        };
        let clicked = self
            .post(
                "execute/sync",
                json!({
                    "script": SHADOW_CLICK_SCRIPT,
                    "args": [element_arg(&host), selectors.filter_toggle_target],
                }),
            )
            .await?;
        Ok(clicked.as_bool().unwrap_or(false))
    }
}

/// Sends one WebDriver command and unwraps its `value`.
async fn execute(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, SurfaceError> {
    let mut request = client.request(method.clone(), url);
    if let Some(body) = body {
        request = request.json(&body);
    } else if method == Method::POST {
        request = request.json(&json!({}));
    }

    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let payload: Value = response.json().await.map_err(transport_error)?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        Ok(value)
    } else {
        Err(classify_error(&value))
    }
}

/// A timed-out command or an unreadable response body is worth
/// repeating; anything else on the wire means the backend is gone.
fn transport_error(e: reqwest::Error) -> SurfaceError {
    if e.is_timeout() {
        SurfaceError::Timeout(format!("WebDriver command: {e}"))
    } else if e.is_decode() {
        SurfaceError::Command(format!("unreadable WebDriver response: {e}"))
    } else {
        SurfaceError::Http(e)
    }
}

#[async_trait]
impl MapSurface for WebDriverSurface {
    fn name(&self) -> &str {
        "webdriver"
    }

    async fn prepare(&mut self) -> Result<(), SurfaceError> {
        log::info!("Opening {}", self.settings.page_url);
        self.post("url", json!({"url": self.settings.page_url}))
            .await?;
        tokio::time::sleep(Duration::from_millis(self.settings.page_load_ms)).await;

        let wait = Duration::from_millis(self.settings.prepare_wait_ms);
        let mut handled = 0;

        for css in &self.settings.selectors.initial_clicks {
            if self.click_if_present(css, wait).await? {
                log::info!("  [Initial] Clicked '{css}'");
                handled += 1;
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
        }

        if self.toggle_filter(wait).await? {
            log::info!("  [Initial] Alert filter toggled");
            handled += 1;
        } else {
            log::warn!("  [Initial] Alert filter toggle not found");
        }

        for css in &self.settings.selectors.closing_clicks {
            if self.click_if_present(css, wait).await? {
                log::info!("  [Initial] Clicked '{css}'");
                handled += 1;
            }
        }

        self.dismiss_overlays().await?;

        for i in 0..self.settings.zoom_clicks {
            let zoom = &self.settings.selectors.zoom_in;
            if !self.click_if_present(zoom, wait).await? {
                log::warn!("  [Zoom] Zoom control not found on click #{}", i + 1);
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        log::info!("Page preparation finished ({handled} elements handled)");
        Ok(())
    }

    async fn coordinate_text(&mut self) -> Result<String, SurfaceError> {
        let element = self.find(&self.settings.selectors.location).await?;
        self.text(&element).await
    }

    async fn send_pan(
        &mut self,
        direction: PanDirection,
        steps: u32,
        key_pause: Duration,
    ) -> Result<(), SurfaceError> {
        let map = self
            .find(&self.settings.selectors.map)
            .await
            .map_err(|e| match e {
                SurfaceError::NotFound(_) | SurfaceError::Stale => SurfaceError::MapMissing,
                other => other,
            })?;
        self.click_element(&map).await?;

        let key = arrow_key(direction);
        let pause = u64::try_from(key_pause.as_millis()).unwrap_or(u64::MAX);
        let actions: Vec<Value> = (0..steps)
            .flat_map(|_| {
                [
                    json!({"type": "keyDown", "value": key}),
                    json!({"type": "keyUp", "value": key}),
                    json!({"type": "pause", "duration": pause}),
                ]
            })
            .collect();

        self.post(
            "actions",
            json!({"actions": [{"type": "key", "id": "keyboard", "actions": actions}]}),
        )
        .await?;
        self.command(Method::DELETE, "actions", None).await?;
        Ok(())
    }

    async fn dismiss_overlays(&mut self) -> Result<bool, SurfaceError> {
        let selectors = &self.settings.selectors;
        let mut visible = false;
        for overlay in self.find_all(&selectors.overlay).await? {
            if self.displayed(&overlay).await.unwrap_or(false) {
                visible = true;
                break;
            }
        }
        if !visible {
            return Ok(false);
        }

        log::info!("  [Overlay] Recurring overlay detected, closing");
        let closed = self
            .click_if_present(&selectors.overlay_close, Duration::from_secs(2))
            .await?;
        if closed {
            tokio::time::sleep(Duration::from_millis(300)).await;
        } else {
            log::warn!(
                "  [Overlay] Close button '{}' not found",
                selectors.overlay_close
            );
        }
        Ok(closed)
    }

    async fn markers(&mut self) -> Result<Vec<MarkerHandle>, SurfaceError> {
        let mut markers = Vec::new();
        for element in self.find_all(&self.settings.selectors.markers).await? {
            let class = match self.attribute(&element, "class").await {
                Ok(class) => class,
                Err(SurfaceError::Stale) => continue,
                Err(e) => return Err(e),
            };
            let Some(kind) = self.settings.selectors.marker_kind(&class) else {
                continue;
            };
            if !self.displayed(&element).await.unwrap_or(false) {
                continue;
            }
            markers.push(MarkerHandle { element, kind });
        }
        Ok(markers)
    }

    async fn click(&mut self, element: &ElementRef) -> Result<(), SurfaceError> {
        self.click_element(element).await
    }

    async fn force_interact(&mut self, element: &ElementRef) -> Result<(), SurfaceError> {
        self.script_click(element).await
    }

    async fn await_detail(&mut self, timeout: Duration) -> Result<(), SurfaceError> {
        self.wait_for(&self.settings.selectors.detail, timeout)
            .await
            .map(|_| ())
    }

    async fn read_detail_field(&mut self, field: DetailField) -> Result<String, SurfaceError> {
        let element = self.find(self.settings.selectors.for_field(field)).await?;
        self.text(&element).await
    }

    async fn close_detail(&mut self) -> Result<(), SurfaceError> {
        let css = &self.settings.selectors.close_detail;
        match self.click_if_present(css, Duration::from_secs(2)).await {
            Ok(true) => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn shutdown(&mut self) -> Result<(), SurfaceError> {
        self.command(Method::DELETE, "", None).await?;
        log::info!("WebDriver session closed");
        Ok(())
    }
}
