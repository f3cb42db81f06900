//! Request dispatch: authenticate, call the store, shape the response.

use crate::auth::{Authenticator, Identity, bearer_token};
use crate::error::{FlowError, classify};
use crate::kv::KvStore;
use crate::lanes::assign_lanes;
use crate::pagination::{PageLimits, PageRequest};
use crate::protocol::{PageParams, Pagination, PublicFlow, Request, Response, Timeline};
use crate::storage::SqliteKv;
use crate::store::FlowStore;
use eyre::{Context, Result};

/// Owns the store and the authenticator. Not `Sync`; the server drives it
/// from a single task.
pub struct Service<K: KvStore = SqliteKv> {
    store: FlowStore<K>,
    auth: Box<dyn Authenticator>,
    limits: PageLimits,
}

impl<K: KvStore> Service<K> {
    pub fn new(store: FlowStore<K>, auth: impl Authenticator + 'static, limits: PageLimits) -> Self {
        Self {
            store,
            auth: Box::new(auth),
            limits,
        }
    }

    pub fn store(&self) -> &FlowStore<K> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut FlowStore<K> {
        &mut self.store
    }

    /// Handle a single request. Never fails: errors become error responses.
    pub fn handle(&mut self, request: Request) -> Response {
        match self.dispatch(request) {
            Ok(response) => response,
            Err(e) => {
                let (status, message) = classify(&e);
                if status >= 500 {
                    log::error!("Request failed: {:#}", e);
                } else {
                    log::debug!("Request rejected ({}): {:#}", status, e);
                }
                Response::error(status, message)
            }
        }
    }

    fn dispatch(&mut self, request: Request) -> Result<Response> {
        match request {
            Request::Ping => Ok(Response::Pong),

            Request::ListPublic { page } => {
                let request = self.page_request(&page);
                let page = self.store.list_public(&request).context("Failed to list public flows")?;
                let pagination = Pagination::of(&page, request.limit);
                Ok(Response::PublicFlows {
                    flows: page.items.into_iter().map(PublicFlow::from).collect(),
                    pagination,
                })
            }

            Request::PublicTimeline => {
                let flows = self
                    .store
                    .collect_public(self.limits.max)
                    .context("Failed to collect flows for timeline")?;
                let timeline = Timeline::from(assign_lanes(&flows));
                Ok(Response::Timeline { timeline })
            }

            Request::Load { auth, flow_id, page } => {
                let identity = self.identify(auth.as_deref())?;

                match flow_id.filter(|id| !id.is_empty()) {
                    Some(id) => match self.store.get(&identity.user_id, &id).context("Failed to load flow")? {
                        Some(flow) => Ok(Response::Flow { flow }),
                        None => Err(FlowError::NotFound(id).into()),
                    },
                    None => {
                        let request = self.page_request(&page);
                        let page = self
                            .store
                            .list_owned(&identity.user_id, &request)
                            .context("Failed to list flows")?;
                        let pagination = Pagination::of(&page, request.limit);
                        Ok(Response::Flows {
                            flows: page.items,
                            pagination,
                        })
                    }
                }
            }

            Request::Save { auth, body } => {
                let identity = self.identify(auth.as_deref())?;
                let (draft, expected_version) = body.into_draft()?;
                let flow = self
                    .store
                    .save(&identity.user_id, draft, expected_version)
                    .context("Failed to save flow")?;
                log::info!("{} saved {} (version {})", identity.user_id, flow.id, flow.version);
                Ok(Response::Saved {
                    flow_id: flow.id,
                    version: flow.version,
                })
            }

            Request::Delete { auth, flow_id } => {
                let identity = self.identify(auth.as_deref())?;
                let id = flow_id
                    .filter(|id| !id.is_empty())
                    .ok_or(FlowError::MissingField("flow_id"))?;

                if self
                    .store
                    .delete(&identity.user_id, &id)
                    .context("Failed to delete flow")?
                {
                    log::info!("{} deleted {}", identity.user_id, id);
                    Ok(Response::Deleted { flow_id: id })
                } else {
                    Err(FlowError::NotFound(id).into())
                }
            }

            Request::OwnedTimeline { auth } => {
                let identity = self.identify(auth.as_deref())?;
                let flows = self
                    .store
                    .collect_owned(&identity.user_id, self.limits.max)
                    .context("Failed to collect flows for timeline")?;
                let timeline = Timeline::from(assign_lanes(&flows));
                Ok(Response::Timeline { timeline })
            }

            Request::SyncUser {
                auth,
                name,
                description,
            } => {
                let identity = self.identify(auth.as_deref())?;
                let (profile, already_exists) = self
                    .store
                    .sync_user(
                        &identity.user_id,
                        &identity.email,
                        name.as_deref(),
                        description.as_deref(),
                    )
                    .context("Failed to sync user")?;
                Ok(Response::UserSynced {
                    user_id: profile.user_id,
                    already_exists,
                })
            }
        }
    }

    fn identify(&self, header: Option<&str>) -> Result<Identity> {
        let token = bearer_token(header)?;
        Ok(self.auth.authenticate(token)?)
    }

    fn page_request(&self, page: &PageParams) -> PageRequest {
        PageRequest::from_params(page.limit.as_deref(), page.cursor.as_deref(), self.limits)
    }
}
