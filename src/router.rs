use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    consts::{BELL_ICON_STYLES, ENVELOPE_ICON_STYLES, VALID_THEMES},
    diagnostics::PollDiagnostics,
    domains::DomainAuthorizer,
    engine::{PageKind, ReconciliationEngine},
    model::{IconStyles, OptionsData, PageRecord, PopupData, SelectorsResponse},
    poller::PollingLoop,
    settings::{SettingRejection, SettingsStore},
    Error, Result,
};

#[derive(Debug, Clone, Deserialize)]
pub struct DomainRequest {
    pub domain: String,
}

/// Inbound request, tagged by `action` with its payload under `data`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "camelCase")]
pub enum Request {
    UpdateOptions(Map<String, Value>),
    OpenSignInPage,
    GetSelectors,
    OnSiteUpdate(PageRecord),
    TestMessage(Map<String, Value>),
    GetPopupData,
    GetOptionsData,
    OpenNotifsPage,
    OpenMessagesPage,
    GetDiagnostics,
    RequestDomainPermission(DomainRequest),
    RevokeDomainPermission(DomainRequest),
}

impl Request {
    pub const ACTIONS: [&'static str; 12] = [
        "updateOptions",
        "openSignInPage",
        "getSelectors",
        "onSiteUpdate",
        "testMessage",
        "getPopupData",
        "getOptionsData",
        "openNotifsPage",
        "openMessagesPage",
        "getDiagnostics",
        "requestDomainPermission",
        "revokeDomainPermission",
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub status: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, Vec<String>>,
    /// Domain the user has to grant before it can be selected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_required: Option<String>,
}

impl UpdateResponse {
    pub fn ok() -> Self {
        Self {
            status: true,
            errors: BTreeMap::new(),
            permission_required: None,
        }
    }

    pub fn failed(errors: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            status: false,
            errors,
            permission_required: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionResponse {
    pub domain: String,
    pub granted: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ack,
    Update(UpdateResponse),
    Selectors(SelectorsResponse),
    Popup(PopupData),
    Options(OptionsData),
    Diagnostics(PollDiagnostics),
    Permission(PermissionResponse),
}

/// Dispatches each request to exactly one handler and answers once the
/// handler has finished.
pub struct MessageRouter {
    settings: Arc<SettingsStore>,
    engine: Arc<ReconciliationEngine>,
    poller: Arc<PollingLoop>,
    authorizer: Arc<dyn DomainAuthorizer>,
    version: String,
}

impl MessageRouter {
    pub fn new(
        settings: Arc<SettingsStore>,
        engine: Arc<ReconciliationEngine>,
        poller: Arc<PollingLoop>,
        authorizer: Arc<dyn DomainAuthorizer>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            engine,
            poller,
            authorizer,
            version: version.into(),
        }
    }

    /// Decodes a raw `{action, data}` object and dispatches it. Unknown
    /// actions and malformed payloads are protocol errors.
    pub async fn dispatch_value(&self, raw: Value) -> Result<Response> {
        let action = raw
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("Request is missing an action".to_string()))?
            .to_string();
        if !Request::ACTIONS.contains(&action.as_str()) {
            return Err(Error::Protocol(format!(
                "No handler defined for action {action}"
            )));
        }

        let request = serde_json::from_value::<Request>(raw)
            .map_err(|error| Error::Protocol(format!("Malformed {action} request: {error}")))?;
        self.dispatch(request).await
    }

    pub async fn dispatch(&self, request: Request) -> Result<Response> {
        debug!("dispatching {request:?}");
        match request {
            Request::UpdateOptions(changes) => {
                Ok(Response::Update(self.update_options(&changes).await))
            }
            Request::OpenSignInPage => self.open(PageKind::SignIn),
            Request::GetSelectors => Ok(Response::Selectors(SelectorsResponse {
                selectors: self.settings.profile().selectors.clone(),
                only_trusted_domain: self.settings.get_all().preferred_domain,
            })),
            Request::OnSiteUpdate(record) => {
                let outcome = self.engine.ingest(&record);
                debug!("site update: {outcome:?}");
                self.poller.restart(self.settings.get_all().update_interval);
                Ok(Response::Ack)
            }
            Request::TestMessage(changes) => match self.settings.draft(&changes) {
                Ok(draft) => {
                    let unread = self.engine.test_notification(&draft);
                    debug!("test notification with {unread:?}");
                    Ok(Response::Ack)
                }
                Err(errors) => Ok(Response::Update(UpdateResponse::failed(errors))),
            },
            Request::GetPopupData => self.popup_data().map(Response::Popup),
            Request::GetOptionsData => self.options_data().map(Response::Options),
            Request::OpenNotifsPage => self.open(PageKind::Notifications),
            Request::OpenMessagesPage => self.open(PageKind::Messages),
            Request::GetDiagnostics => Ok(Response::Diagnostics(self.poller.diagnostics())),
            Request::RequestDomainPermission(DomainRequest { domain }) => {
                let granted = if self.settings.profile().is_allowed_domain(&domain) {
                    self.authorizer.request_permission(&domain).await
                } else {
                    warn!("refusing permission request for unknown domain {domain}");
                    false
                };
                Ok(Response::Permission(PermissionResponse { domain, granted }))
            }
            Request::RevokeDomainPermission(DomainRequest { domain }) => {
                let revoked = self.authorizer.revoke_permission(&domain).await;
                info!("revoke {domain}: {revoked}");
                Ok(Response::Permission(PermissionResponse {
                    domain,
                    granted: false,
                }))
            }
        }
    }

    async fn update_options(&self, changes: &Map<String, Value>) -> UpdateResponse {
        let outcomes = self.settings.set_all(changes).await;
        let mut response = UpdateResponse::ok();
        for outcome in outcomes {
            let Err(rejection) = &outcome.result else {
                continue;
            };
            if let SettingRejection::PermissionDenied { domain } = rejection {
                response.permission_required = Some(domain.clone());
            }
            response.status = false;
            response.errors.insert(outcome.key.clone(), outcome.errors());
        }
        response
    }

    fn open(&self, page: PageKind) -> Result<Response> {
        self.engine.open_page(page)?;
        Ok(Response::Ack)
    }

    fn popup_data(&self) -> Result<PopupData> {
        let settings = self.settings.get_all();
        let identity = self.engine.identity();
        Ok(PopupData {
            unread_counts: self.engine.unread(),
            signed_in: identity.signed_in,
            username: identity.username,
            domain: settings.preferred_domain,
            theme: self.engine.resolve_theme(&settings.theme)?,
            version: self.version.clone(),
            last_check: identity.last_check,
        })
    }

    fn options_data(&self) -> Result<OptionsData> {
        let settings = self.settings.get_all();
        let theme = self.engine.resolve_theme(&settings.theme)?;
        let owned = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        Ok(OptionsData {
            settings,
            theme,
            version: self.version.clone(),
            valid_domains: self.settings.profile().domains.clone(),
            valid_themes: owned(&VALID_THEMES),
            valid_icon_styles: IconStyles {
                bell: owned(&BELL_ICON_STYLES),
                envelope: owned(&ENVELOPE_ICON_STYLES),
            },
        })
    }
}
