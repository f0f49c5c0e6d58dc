//! Registry of the subsystem contexts held by one chain, with start/stop bookkeeping.
//!
//! 一条链持有的子系统上下文注册表，以及启动/停止的簿记。

use super::{SubsystemContext, SubsystemKind};
use crate::error::{Error, Result};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{debug, warn};

struct Slot {
    context: Arc<dyn SubsystemContext>,
    started: bool,
}

/// Slots of subsystem contexts for one device, keyed by kind.
///
/// 一个设备的子系统上下文槽位，以种类为键。
pub struct SubsystemRegistry {
    slots: BTreeMap<SubsystemKind, Slot>,
    required: Vec<SubsystemKind>,
    start_timeout: Duration,
    stop_timeout: Duration,
}

impl std::fmt::Debug for SubsystemRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubsystemRegistry")
            .field("registered", &self.kinds())
            .field("started", &self.started())
            .field("required", &self.required)
            .finish()
    }
}

impl SubsystemRegistry {
    pub fn new(
        required: Vec<SubsystemKind>,
        start_timeout: Duration,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            slots: BTreeMap::new(),
            required,
            start_timeout,
            stop_timeout,
        }
    }

    /// Registers a context under its kind. Returns `false` if the slot is already taken.
    ///
    /// 在其种类下注册上下文。如果槽位已被占用则返回 `false`。
    pub fn insert(&mut self, context: Arc<dyn SubsystemContext>) -> bool {
        let kind = context.kind();
        if self.slots.contains_key(&kind) {
            return false;
        }
        self.slots.insert(
            kind,
            Slot {
                context,
                started: false,
            },
        );
        true
    }

    /// True iff every required slot holds a context.
    /// 当且仅当每个必需槽位都持有上下文时为真。
    pub fn is_ready(&self) -> bool {
        self.required
            .iter()
            .all(|kind| self.slots.contains_key(kind))
    }

    pub fn missing(&self) -> Vec<SubsystemKind> {
        self.required
            .iter()
            .filter(|kind| !self.slots.contains_key(kind))
            .copied()
            .collect()
    }

    pub fn kinds(&self) -> Vec<SubsystemKind> {
        self.slots.keys().copied().collect()
    }

    pub fn started(&self) -> Vec<SubsystemKind> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.started)
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Starts every registered context in kind order. On the first failure the
    /// contexts started so far are stopped again and the failure is returned,
    /// so either all contexts run or none do.
    ///
    /// 按种类顺序启动每个已注册的上下文。首次失败时，已启动的上下文会被再次停止并返回失败，
    /// 因此要么所有上下文都运行，要么都不运行。
    pub async fn start_all(&mut self) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::NotReady {
                missing: self.missing(),
            });
        }

        let pending: Vec<(SubsystemKind, Arc<dyn SubsystemContext>)> = self
            .slots
            .iter()
            .filter(|(_, slot)| !slot.started)
            .map(|(kind, slot)| (*kind, slot.context.clone()))
            .collect();

        for (kind, context) in pending {
            if let Err(e) = self.start_one(kind, context).await {
                warn!(%kind, error = %e, "Subsystem start failed, rolling back");
                self.stop_all().await;
                return Err(e);
            }
            if let Some(slot) = self.slots.get_mut(&kind) {
                slot.started = true;
            }
            debug!(%kind, "Subsystem started");
        }
        Ok(())
    }

    async fn start_one(&self, kind: SubsystemKind, context: Arc<dyn SubsystemContext>) -> Result<()> {
        if !context.is_ready() {
            return Err(Error::SubsystemNotReady(kind));
        }
        match timeout(self.start_timeout, context.start()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(Error::SubsystemStart { kind, source }),
            Err(_) => {
                // The abandoned start may have begun its work; stop it like a started one.
                // 被放弃的启动可能已经开始工作；像已启动的子系统一样停止它。
                warn!(%kind, timeout = ?self.start_timeout, "Subsystem start timed out, stopping it");
                self.stop_one(kind, &context).await;
                Err(Error::SubsystemTimeout { kind })
            }
        }
    }

    async fn stop_one(&self, kind: SubsystemKind, context: &Arc<dyn SubsystemContext>) {
        match timeout(self.stop_timeout, context.stop()).await {
            Ok(Ok(())) => debug!(%kind, "Subsystem stopped"),
            Ok(Err(e)) => warn!(%kind, error = %e, "Subsystem failed to stop cleanly"),
            Err(_) => warn!(%kind, "Subsystem stop timed out"),
        }
    }

    /// Stops every started context in reverse kind order. Failures are logged and
    /// the context is considered stopped anyway.
    ///
    /// 按种类逆序停止每个已启动的上下文。失败会被记录，且无论如何都视为已停止。
    pub async fn stop_all(&mut self) {
        let started: Vec<(SubsystemKind, Arc<dyn SubsystemContext>)> = self
            .slots
            .iter()
            .rev()
            .filter(|(_, slot)| slot.started)
            .map(|(kind, slot)| (*kind, slot.context.clone()))
            .collect();

        for (kind, context) in started {
            self.stop_one(kind, &context).await;
            if let Some(slot) = self.slots.get_mut(&kind) {
                slot.started = false;
            }
        }
    }

    /// Drops every registered context. Callers stop them first.
    /// 丢弃所有已注册的上下文。调用方需先停止它们。
    pub fn release(&mut self) {
        self.slots.clear();
    }
}
