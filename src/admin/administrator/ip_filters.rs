//! The IP filter list handlers.

use super::Administrator;
use crate::admin::proto::{IpFilters, Msg, Response};
use std::sync::Arc;

impl Administrator {
    pub(super) async fn handle_get_ip_filters(&self) -> Msg {
        let filters = self.ip_filters.lock().await;
        Msg::GetIpFiltersResponse(Response::Success(IpFilters {
            disallowed: filters.disallowed.clone(),
            allowed: filters.allowed.clone(),
        }))
    }

    pub(super) async fn handle_set_ip_filters(self: &Arc<Self>, incoming: IpFilters) -> Msg {
        for entry in incoming.disallowed.iter().chain(incoming.allowed.iter()) {
            if parse_filter_entry(entry).is_none() {
                return Msg::SetIpFiltersResponse(Response::failure(22, format!("invalid filter entry: {entry}")));
            }
        }
        {
            let mut filters = self.ip_filters.lock().await;
            filters.disallowed = incoming.disallowed;
            filters.allowed = incoming.allowed;
        }
        self.schedule_save();
        Msg::SetIpFiltersResponse(Response::Success(()))
    }
}

/// Accepts bare addresses and `addr/prefix` ranges.
fn parse_filter_entry(entry: &str) -> Option<()> {
    match entry.split_once('/') {
        None => entry.parse::<std::net::IpAddr>().ok().map(|_| ()),
        Some((addr, prefix)) => {
            let addr = addr.parse::<std::net::IpAddr>().ok()?;
            let prefix = prefix.parse::<u8>().ok()?;
            let max = if addr.is_ipv4() { 32 } else { 128 };
            (prefix <= max).then_some(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_filter_entry;

    #[test]
    fn filter_entries_validate() {
        assert!(parse_filter_entry("192.0.2.1").is_some());
        assert!(parse_filter_entry("10.0.0.0/8").is_some());
        assert!(parse_filter_entry("2001:db8::/32").is_some());
        assert!(parse_filter_entry("10.0.0.0/64").is_none());
        assert!(parse_filter_entry("not-an-ip").is_none());
    }
}
