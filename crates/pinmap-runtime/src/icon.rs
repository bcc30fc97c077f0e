#![forbid(unsafe_code)]

//! Marker icon registration.
//!
//! # Design
//!
//! Registration is check, load, check again, add. Loading is asynchronous,
//! so several registrations for the same id can be in flight at once (one
//! per filter rebuild). The second `has_image` check after the load lets
//! every late finisher observe the image added by the first one instead of
//! failing on a duplicate.
//!
//! Each registration carries a [`CancellationToken`]. A rebuild cancels the
//! previous cycle's token, so a superseded load resolves to
//! [`IconOutcome::Superseded`] without touching the engine.
//!
//! # Failure Modes
//!
//! | Failure | Behavior |
//! |---------|----------|
//! | Load fails | logged at `error`, [`IconError::Load`] |
//! | Engine rejects the image | logged at `error`, [`IconError::Register`] |
//! | Cancelled before completion | [`IconOutcome::Superseded`], no engine call |

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{Either, LocalBoxFuture, select};
use futures::pin_mut;
use pinmap_core::config::MapConfig;
use pinmap_core::engine::{ImageOptions, MapHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error};

use crate::error::IconError;

/// What to register and how.
#[derive(Debug, Clone, PartialEq)]
pub struct IconSpec {
    pub id: String,
    pub url: String,
    pub pixel_ratio: f32,
}

impl IconSpec {
    /// The configured user pin. Always an SDF image so it can be tinted.
    #[must_use]
    pub fn from_config(config: &MapConfig) -> Self {
        Self {
            id: config.icon_id.clone(),
            url: config.icon_url.clone(),
            pixel_ratio: config.icon_pixel_ratio,
        }
    }

    #[must_use]
    pub fn options(&self) -> ImageOptions {
        ImageOptions {
            sdf: true,
            pixel_ratio: self.pixel_ratio,
        }
    }
}

/// Successful end states of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconOutcome {
    /// This registration added the image.
    Registered,
    /// The image was present before or after loading.
    AlreadyRegistered,
    /// Cancelled before it could finish.
    Superseded,
}

/// Make sure `icon` is registered on `map`.
///
/// # Errors
///
/// [`IconError::Load`] if fetching fails, [`IconError::Register`] if the
/// engine rejects the image.
pub async fn ensure_icon_registered(
    map: MapHandle,
    icon: IconSpec,
    cancel: CancellationToken,
) -> Result<IconOutcome, IconError> {
    if map.has_image(&icon.id) {
        return Ok(IconOutcome::AlreadyRegistered);
    }
    if cancel.is_cancelled() {
        return Ok(IconOutcome::Superseded);
    }

    let load = map.load_image(&icon.url);
    let image = {
        let cancelled = cancel.cancelled();
        pin_mut!(cancelled);
        match select(load, cancelled).await {
            Either::Left((Ok(image), _)) => image,
            Either::Left((Err(cause), _)) => {
                error!(icon = %icon.id, url = %icon.url, %cause, "icon load failed");
                return Err(IconError::Load {
                    icon_id: icon.id,
                    url: icon.url,
                    cause,
                });
            }
            Either::Right(_) => {
                debug!(icon = %icon.id, "icon load superseded");
                return Ok(IconOutcome::Superseded);
            }
        }
    };

    // Another registration may have finished while this load was in flight.
    if map.has_image(&icon.id) {
        return Ok(IconOutcome::AlreadyRegistered);
    }
    map.add_image(&icon.id, image, icon.options()).map_err(|cause| {
        error!(icon = %icon.id, %cause, "icon registration failed");
        IconError::Register {
            icon_id: icon.id.clone(),
            cause,
        }
    })?;
    debug!(icon = %icon.id, "icon registered");
    Ok(IconOutcome::Registered)
}

/// In-flight registration started by a filter rebuild.
///
/// Nothing happens until it is polled: await it, or hand it to a spawner.
#[must_use = "icon registration does nothing unless polled"]
pub struct IconRegistration {
    inner: LocalBoxFuture<'static, Result<IconOutcome, IconError>>,
    cancel: CancellationToken,
}

impl IconRegistration {
    pub fn new(map: MapHandle, icon: IconSpec, cancel: CancellationToken) -> Self {
        let span = debug_span!("icon_registration", icon = %icon.id);
        let inner = ensure_icon_registered(map, icon, cancel.clone())
            .instrument(span)
            .boxed_local();
        Self { inner, cancel }
    }

    /// Already-resolved registration.
    pub fn ready(outcome: IconOutcome) -> Self {
        Self {
            inner: futures::future::ready(Ok(outcome)).boxed_local(),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that supersedes this registration when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop this registration; it resolves to [`IconOutcome::Superseded`]
    /// unless it already finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for IconRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IconRegistration")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Future for IconRegistration {
    type Output = Result<IconOutcome, IconError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::{LocalPool, block_on};
    use futures::task::LocalSpawnExt;
    use pinmap_core::engine::EngineError;
    use pinmap_harness::{EngineOp, HeadlessMap};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn spec() -> IconSpec {
        IconSpec::from_config(&MapConfig::default())
    }

    #[test]
    fn registers_sdf_icon_once() {
        let map = Rc::new(HeadlessMap::new());
        let outcome = block_on(IconRegistration::new(
            map.clone(),
            spec(),
            CancellationToken::new(),
        ));
        assert_eq!(outcome, Ok(IconOutcome::Registered));
        assert_eq!(map.image_ids(), vec!["user-pin".to_string()]);
        let options = map.image_options("user-pin").unwrap();
        assert!(options.sdf);
        assert!((options.pixel_ratio - 2.0).abs() < f32::EPSILON);

        let again = block_on(IconRegistration::new(map.clone(), spec(), CancellationToken::new()));
        assert_eq!(again, Ok(IconOutcome::AlreadyRegistered));
        let loads = map
            .ops()
            .iter()
            .filter(|op| matches!(op, EngineOp::LoadImage(_)))
            .count();
        assert_eq!(loads, 1);
    }

    #[test]
    fn concurrent_registrations_add_one_image() {
        let map = Rc::new(HeadlessMap::new());
        map.defer_image_loads();
        let mut pool = LocalPool::new();
        let results = Rc::new(RefCell::new(Vec::new()));
        for _ in 0..4 {
            let registration = IconRegistration::new(map.clone(), spec(), CancellationToken::new());
            let sink = Rc::clone(&results);
            pool.spawner()
                .spawn_local(async move {
                    let result = registration.await;
                    sink.borrow_mut().push(result);
                })
                .unwrap();
        }
        pool.run_until_stalled();
        assert_eq!(map.pending_image_loads(), 4);

        map.complete_image_loads();
        pool.run_until_stalled();

        let results = results.borrow();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(
            results.iter().filter(|r| **r == Ok(IconOutcome::Registered)).count(),
            1
        );
        assert_eq!(map.image_ids().len(), 1);
    }

    #[test]
    fn load_failure_is_reported() {
        let map = Rc::new(HeadlessMap::new());
        map.fail_image("/img/user-pin-sdf.png");
        let err = block_on(IconRegistration::new(map.clone(), spec(), CancellationToken::new()))
            .unwrap_err();
        assert!(matches!(
            err,
            IconError::Load { cause: EngineError::ImageLoad { .. }, .. }
        ));
        assert!(map.image_ids().is_empty());
    }

    #[test]
    fn cancelled_registration_never_adds() {
        let map = Rc::new(HeadlessMap::new());
        map.defer_image_loads();
        let mut pool = LocalPool::new();
        let outcome = Rc::new(RefCell::new(None));
        let registration = IconRegistration::new(map.clone(), spec(), CancellationToken::new());
        let token = registration.cancel_token().clone();
        let sink = Rc::clone(&outcome);
        pool.spawner()
            .spawn_local(async move {
                let result = registration.await;
                *sink.borrow_mut() = Some(result);
            })
            .unwrap();
        pool.run_until_stalled();

        token.cancel();
        pool.run_until_stalled();
        map.complete_image_loads();
        pool.run_until_stalled();

        assert_eq!(*outcome.borrow(), Some(Ok(IconOutcome::Superseded)));
        assert!(map.image_ids().is_empty());
    }

    #[test]
    fn ready_registration_resolves_immediately() {
        let registration = IconRegistration::ready(IconOutcome::AlreadyRegistered);
        assert_eq!(block_on(registration), Ok(IconOutcome::AlreadyRegistered));
    }
}
