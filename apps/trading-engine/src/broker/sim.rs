//! Simulated broker for tests and paper operation.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{BrokerClient, BrokerError, BrokerOrder, BrokerPosition};
use crate::models::PlannedOrder;

/// In-memory broker that accepts every bracket and tracks its book.
#[derive(Debug)]
pub struct SimulatedBroker {
    connected: AtomicBool,
    paper: AtomicBool,
    account: String,
    account_value: RwLock<Decimal>,
    next_order_id: AtomicI64,
    open_orders: RwLock<HashMap<i64, BrokerOrder>>,
    positions: RwLock<Vec<BrokerPosition>>,
    reject_all: AtomicBool,
}

impl SimulatedBroker {
    /// Create a connected paper broker with the given account value.
    #[must_use]
    pub fn new(account_value: Decimal) -> Self {
        Self {
            connected: AtomicBool::new(true),
            paper: AtomicBool::new(true),
            account: "SIM000001".to_string(),
            account_value: RwLock::new(account_value),
            next_order_id: AtomicI64::new(1),
            open_orders: RwLock::new(HashMap::new()),
            positions: RwLock::new(Vec::new()),
            reject_all: AtomicBool::new(false),
        }
    }

    /// Flip the connection flag.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Flip the paper-account flag.
    pub fn set_paper(&self, paper: bool) {
        self.paper.store(paper, Ordering::SeqCst);
    }

    /// Make every subsequent bracket submission fail.
    pub fn set_reject_all(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::SeqCst);
    }

    /// Inject an open order into the simulated book.
    pub fn add_open_order(&self, order: BrokerOrder) {
        if let Ok(mut orders) = self.open_orders.write() {
            orders.insert(order.order_id, order);
        }
    }

    /// Inject a position.
    pub fn add_position(&self, position: BrokerPosition) {
        if let Ok(mut positions) = self.positions.write() {
            positions.push(position);
        }
    }

    /// Mark an open order with a broker-side status string.
    pub fn set_order_status(&self, order_id: i64, status: &str) {
        if let Ok(mut orders) = self.open_orders.write()
            && let Some(order) = orders.get_mut(&order_id)
        {
            order.status = status.to_string();
        }
    }

    fn allocate_ids(&self) -> Vec<i64> {
        let first = self.next_order_id.fetch_add(3, Ordering::SeqCst);
        vec![first, first + 1, first + 2]
    }
}

#[async_trait]
impl BrokerClient for SimulatedBroker {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_paper_account(&self) -> bool {
        self.paper.load(Ordering::SeqCst)
    }

    fn account_number(&self) -> Option<String> {
        Some(self.account.clone())
    }

    async fn get_account_value(&self) -> Result<Decimal, BrokerError> {
        if !self.connected() {
            return Err(BrokerError::NotConnected);
        }
        self.account_value
            .read()
            .map(|value| *value)
            .map_err(|_| BrokerError::Transport("account value lock poisoned".to_string()))
    }

    async fn place_bracket_order(
        &self,
        order: &PlannedOrder,
        quantity: Decimal,
        _equity: Decimal,
    ) -> Result<Vec<i64>, BrokerError> {
        if !self.connected() {
            return Err(BrokerError::NotConnected);
        }
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(BrokerError::Rejected("rejected by simulation".to_string()));
        }

        let ids = self.allocate_ids();
        let parent_id = ids[0];
        if let Ok(mut orders) = self.open_orders.write() {
            orders.insert(
                parent_id,
                BrokerOrder {
                    order_id: parent_id,
                    symbol: order.symbol.clone(),
                    action: order.action.as_str().to_string(),
                    order_type: order.order_type.as_str().to_string(),
                    lmt_price: order.entry_price,
                    aux_price: order.stop_loss,
                    total_quantity: quantity,
                    remaining_quantity: quantity,
                    status: "Submitted".to_string(),
                    parent_id: 0,
                },
            );
        }
        Ok(ids)
    }

    async fn cancel_order(&self, order_id: i64) -> Result<bool, BrokerError> {
        if !self.connected() {
            return Err(BrokerError::NotConnected);
        }
        let removed = self
            .open_orders
            .write()
            .map(|mut orders| orders.remove(&order_id).is_some())
            .unwrap_or(false);
        Ok(removed)
    }

    async fn get_open_orders(&self) -> Result<Vec<BrokerOrder>, BrokerError> {
        if !self.connected() {
            return Err(BrokerError::NotConnected);
        }
        Ok(self
            .open_orders
            .read()
            .map(|orders| orders.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        if !self.connected() {
            return Err(BrokerError::NotConnected);
        }
        Ok(self
            .positions
            .read()
            .map(|positions| positions.clone())
            .unwrap_or_default())
    }
}
