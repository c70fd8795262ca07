//! Built-in columns and row projectors for the registry entity kinds.
//!
//! This module provides:
//! - Stable column IDs + specs (labels, widths, kinds)
//! - Per-kind column sets for the console tables
//! - JSON projectors that render raw payloads into display cells

#![forbid(unsafe_code)]

use smallvec::SmallVec;

use crate::{EntityKind, ProjectedCell, RowProjector};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Id,
    Projected(u32),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSpec {
    pub kind: ColumnKind,
    pub label: &'static str,
    pub width: f32,
}

// ---------------- Column IDs (stable) ----------------
// Producing assets
pub const PA_OWNER: u32 = 10_001;
pub const PA_FACILITY: u32 = 10_002;
pub const PA_LOCATION: u32 = 10_003;
pub const PA_TYPE: u32 = 10_004;
pub const PA_CAPACITY_KW: u32 = 10_005;
pub const PA_METER_READ_KWH: u32 = 10_006;

// Consuming assets
pub const CA_OWNER: u32 = 11_001;
pub const CA_FACILITY: u32 = 11_002;
pub const CA_LOCATION: u32 = 11_003;
pub const CA_CONSUMPTION_KWH: u32 = 11_004;

// Demands
pub const DEM_BUYER: u32 = 12_001;
pub const DEM_STATUS: u32 = 12_002;
pub const DEM_LOCATION: u32 = 12_003;
pub const DEM_ENERGY_KWH: u32 = 12_004;
pub const DEM_MAX_PRICE: u32 = 12_005;

// Supplies
pub const SUP_ASSET: u32 = 13_001;
pub const SUP_AVAILABLE_KWH: u32 = 13_002;
pub const SUP_PRICE: u32 = 13_003;

// Agreements
pub const AGR_DEMAND: u32 = 14_001;
pub const AGR_SUPPLY: u32 = 14_002;
pub const AGR_START: u32 = 14_003;
pub const AGR_END: u32 = 14_004;

// Certificates
pub const CERT_ASSET: u32 = 15_001;
pub const CERT_OWNER: u32 = 15_002;
pub const CERT_ENERGY_KWH: u32 = 15_003;
pub const CERT_STATUS: u32 = 15_004;
pub const CERT_FOR_SALE: u32 = 15_005;
pub const CERT_PRICE: u32 = 15_006;

fn col(kind: ColumnKind, label: &'static str, width: f32) -> ColumnSpec {
    ColumnSpec { kind, label, width }
}

/// Return the full column set for an entity kind, including the Id column.
pub fn builtin_columns_for(kind: EntityKind) -> Vec<ColumnSpec> {
    let mut cols: Vec<ColumnSpec> = vec![col(ColumnKind::Id, "#", 60.0)];

    match kind {
        EntityKind::ProducingAsset => {
            cols.push(col(ColumnKind::Projected(PA_OWNER), "Owner", 140.0));
            cols.push(col(ColumnKind::Projected(PA_FACILITY), "Facility Name", 160.0));
            cols.push(col(ColumnKind::Projected(PA_LOCATION), "Town, Country", 160.0));
            cols.push(col(ColumnKind::Projected(PA_TYPE), "Type", 100.0));
            cols.push(col(ColumnKind::Projected(PA_CAPACITY_KW), "Nameplate Capacity (kW)", 125.0));
            cols.push(col(ColumnKind::Projected(PA_METER_READ_KWH), "Meter Read (kWh)", 135.0));
        }
        EntityKind::ConsumingAsset => {
            cols.push(col(ColumnKind::Projected(CA_OWNER), "Owner", 140.0));
            cols.push(col(ColumnKind::Projected(CA_FACILITY), "Facility Name", 160.0));
            cols.push(col(ColumnKind::Projected(CA_LOCATION), "Town, Country", 160.0));
            cols.push(col(ColumnKind::Projected(CA_CONSUMPTION_KWH), "Consumption (kWh)", 130.0));
        }
        EntityKind::Demand => {
            cols.push(col(ColumnKind::Projected(DEM_BUYER), "Buyer", 140.0));
            cols.push(col(ColumnKind::Projected(DEM_STATUS), "Status", 90.0));
            cols.push(col(ColumnKind::Projected(DEM_LOCATION), "Country, Region", 160.0));
            cols.push(col(ColumnKind::Projected(DEM_ENERGY_KWH), "Energy per Period (kWh)", 130.0));
            cols.push(col(ColumnKind::Projected(DEM_MAX_PRICE), "Max Price (cents)", 110.0));
        }
        EntityKind::Supply => {
            cols.push(col(ColumnKind::Projected(SUP_ASSET), "Asset", 80.0));
            cols.push(col(ColumnKind::Projected(SUP_AVAILABLE_KWH), "Available (kWh)", 120.0));
            cols.push(col(ColumnKind::Projected(SUP_PRICE), "Price (cents)", 100.0));
        }
        EntityKind::Agreement => {
            cols.push(col(ColumnKind::Projected(AGR_DEMAND), "Demand", 80.0));
            cols.push(col(ColumnKind::Projected(AGR_SUPPLY), "Supply", 80.0));
            cols.push(col(ColumnKind::Projected(AGR_START), "Start", 110.0));
            cols.push(col(ColumnKind::Projected(AGR_END), "End", 110.0));
        }
        EntityKind::Certificate => {
            cols.push(col(ColumnKind::Projected(CERT_ASSET), "Asset", 80.0));
            cols.push(col(ColumnKind::Projected(CERT_OWNER), "Owner", 140.0));
            cols.push(col(ColumnKind::Projected(CERT_ENERGY_KWH), "Certified Energy (kWh)", 130.0));
            cols.push(col(ColumnKind::Projected(CERT_STATUS), "Status", 90.0));
            cols.push(col(ColumnKind::Projected(CERT_FOR_SALE), "For Sale", 70.0));
            cols.push(col(ColumnKind::Projected(CERT_PRICE), "Price (cents)", 100.0));
        }
    }

    cols
}

/// Return the JSON projector for an entity kind.
pub fn builtin_projector_for(kind: EntityKind) -> std::sync::Arc<dyn RowProjector + Send + Sync> {
    std::sync::Arc::new(BuiltinProjector { kind })
}

struct BuiltinProjector {
    kind: EntityKind,
}

fn push_str(out: &mut SmallVec<[ProjectedCell; 8]>, id: u32, v: Option<&serde_json::Value>) {
    if let Some(s) = v.and_then(crate::scalar_string) {
        out.push((id, s));
    }
}

fn push_kwh(out: &mut SmallVec<[ProjectedCell; 8]>, id: u32, wh: Option<&serde_json::Value>) {
    if let Some(wh) = wh.and_then(crate::scalar_f64) {
        out.push((id, format!("{}", wh / 1000.0)));
    }
}

fn push_date(out: &mut SmallVec<[ProjectedCell; 8]>, id: u32, v: Option<&serde_json::Value>) {
    if let Some(secs) = v.and_then(crate::scalar_f64) {
        if let Some(dt) = chrono::DateTime::from_timestamp(secs as i64, 0) {
            out.push((id, dt.format("%Y-%m-%d").to_string()));
        }
    }
}

impl BuiltinProjector {
    fn project_producing_asset(&self, raw: &serde_json::Value) -> SmallVec<[ProjectedCell; 8]> {
        let mut out = SmallVec::new();
        push_str(&mut out, PA_OWNER, raw.pointer("/owner/address"));
        push_str(&mut out, PA_FACILITY, raw.pointer("/offChainProperties/facilityName"));
        let city = raw.pointer("/offChainProperties/city").and_then(|v| v.as_str());
        let country = raw.pointer("/offChainProperties/country").and_then(|v| v.as_str());
        match (city, country) {
            (Some(c), Some(co)) => out.push((PA_LOCATION, format!("{}, {}", c, co))),
            (Some(c), None) => out.push((PA_LOCATION, c.to_string())),
            (None, Some(co)) => out.push((PA_LOCATION, co.to_string())),
            (None, None) => {}
        }
        push_str(&mut out, PA_TYPE, raw.pointer("/offChainProperties/assetType"));
        push_kwh(&mut out, PA_CAPACITY_KW, raw.pointer("/offChainProperties/capacityWh"));
        push_kwh(&mut out, PA_METER_READ_KWH, raw.pointer("/lastSmartMeterReadWh"));
        out
    }

    fn project_consuming_asset(&self, raw: &serde_json::Value) -> SmallVec<[ProjectedCell; 8]> {
        let mut out = SmallVec::new();
        push_str(&mut out, CA_OWNER, raw.pointer("/owner/address"));
        push_str(&mut out, CA_FACILITY, raw.pointer("/offChainProperties/facilityName"));
        let city = raw.pointer("/offChainProperties/city").and_then(|v| v.as_str());
        let country = raw.pointer("/offChainProperties/country").and_then(|v| v.as_str());
        match (city, country) {
            (Some(c), Some(co)) => out.push((CA_LOCATION, format!("{}, {}", c, co))),
            (Some(c), None) => out.push((CA_LOCATION, c.to_string())),
            (None, Some(co)) => out.push((CA_LOCATION, co.to_string())),
            (None, None) => {}
        }
        push_kwh(&mut out, CA_CONSUMPTION_KWH, raw.pointer("/lastSmartMeterReadWh"));
        out
    }

    fn project_demand(&self, raw: &serde_json::Value) -> SmallVec<[ProjectedCell; 8]> {
        let mut out = SmallVec::new();
        push_str(&mut out, DEM_BUYER, raw.pointer("/demandOwner"));
        push_str(&mut out, DEM_STATUS, raw.pointer("/status"));
        let country = raw.pointer("/offChainProperties/locationCountry").and_then(|v| v.as_str());
        let region = raw.pointer("/offChainProperties/locationRegion").and_then(|v| v.as_str());
        match (country, region) {
            (Some(c), Some(r)) => out.push((DEM_LOCATION, format!("{}, {}", c, r))),
            (Some(c), None) => out.push((DEM_LOCATION, c.to_string())),
            // the console shows "any" for demands without a location constraint
            _ => out.push((DEM_LOCATION, "any".to_string())),
        }
        push_kwh(&mut out, DEM_ENERGY_KWH, raw.pointer("/offChainProperties/targetWhPerPeriod"));
        push_str(&mut out, DEM_MAX_PRICE, raw.pointer("/offChainProperties/maxPricePerMwh"));
        out
    }

    fn project_supply(&self, raw: &serde_json::Value) -> SmallVec<[ProjectedCell; 8]> {
        let mut out = SmallVec::new();
        push_str(&mut out, SUP_ASSET, raw.pointer("/assetId"));
        push_kwh(&mut out, SUP_AVAILABLE_KWH, raw.pointer("/offChainProperties/availableWh"));
        push_str(&mut out, SUP_PRICE, raw.pointer("/offChainProperties/price"));
        out
    }

    fn project_agreement(&self, raw: &serde_json::Value) -> SmallVec<[ProjectedCell; 8]> {
        let mut out = SmallVec::new();
        push_str(&mut out, AGR_DEMAND, raw.pointer("/demandId"));
        push_str(&mut out, AGR_SUPPLY, raw.pointer("/supplyId"));
        push_date(&mut out, AGR_START, raw.pointer("/offChainProperties/start"));
        push_date(&mut out, AGR_END, raw.pointer("/offChainProperties/end"));
        out
    }

    fn project_certificate(&self, raw: &serde_json::Value) -> SmallVec<[ProjectedCell; 8]> {
        let mut out = SmallVec::new();
        push_str(&mut out, CERT_ASSET, raw.pointer("/assetId"));
        push_str(&mut out, CERT_OWNER, raw.pointer("/owner"));
        push_kwh(&mut out, CERT_ENERGY_KWH, raw.pointer("/powerInW"));
        push_str(&mut out, CERT_STATUS, raw.pointer("/status"));
        if let Some(b) = raw.pointer("/forSale").and_then(|v| v.as_bool()) {
            out.push((CERT_FOR_SALE, if b { "yes".into() } else { "no".into() }));
        }
        push_str(&mut out, CERT_PRICE, raw.pointer("/priceCents"));
        out
    }
}

impl RowProjector for BuiltinProjector {
    fn project(&self, raw: &serde_json::Value) -> SmallVec<[ProjectedCell; 8]> {
        match self.kind {
            EntityKind::ProducingAsset => self.project_producing_asset(raw),
            EntityKind::ConsumingAsset => self.project_consuming_asset(raw),
            EntityKind::Demand => self.project_demand(raw),
            EntityKind::Supply => self.project_supply(raw),
            EntityKind::Agreement => self.project_agreement(raw),
            EntityKind::Certificate => self.project_certificate(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn producing_asset_cells() {
        let raw = json!({
            "id": "0",
            "owner": { "address": "0xa1" },
            "offChainProperties": {
                "facilityName": "Solar One",
                "city": "Zug",
                "country": "CH",
                "assetType": "Solar",
                "capacityWh": 150_000
            },
            "lastSmartMeterReadWh": 50_000
        });
        let cells = builtin_projector_for(EntityKind::ProducingAsset).project(&raw);
        let get = |id: u32| cells.iter().find(|(i, _)| *i == id).map(|(_, v)| v.as_str());
        assert_eq!(get(PA_FACILITY), Some("Solar One"));
        assert_eq!(get(PA_LOCATION), Some("Zug, CH"));
        assert_eq!(get(PA_CAPACITY_KW), Some("150"));
        assert_eq!(get(PA_METER_READ_KWH), Some("50"));
    }

    #[test]
    fn demand_location_falls_back_to_any() {
        let raw = json!({ "id": "1", "demandOwner": "0xb2", "offChainProperties": {} });
        let cells = builtin_projector_for(EntityKind::Demand).project(&raw);
        let loc = cells.iter().find(|(i, _)| *i == DEM_LOCATION).map(|(_, v)| v.as_str());
        assert_eq!(loc, Some("any"));
    }

    #[test]
    fn certificate_cells_render_sale_state() {
        let raw = json!({
            "id": "3",
            "assetId": "0",
            "owner": "0xa1",
            "powerInW": 1_000_000,
            "status": "Active",
            "forSale": true,
            "priceCents": 150
        });
        let cells = builtin_projector_for(EntityKind::Certificate).project(&raw);
        let get = |id: u32| cells.iter().find(|(i, _)| *i == id).map(|(_, v)| v.as_str());
        assert_eq!(get(CERT_ENERGY_KWH), Some("1000"));
        assert_eq!(get(CERT_FOR_SALE), Some("yes"));
        assert_eq!(get(CERT_PRICE), Some("150"));
    }

    #[test]
    fn column_sets_include_id_first() {
        for kind in EntityKind::ALL {
            let cols = builtin_columns_for(kind);
            assert_eq!(cols[0].kind, ColumnKind::Id, "{kind}");
            assert!(cols.len() >= 4, "{kind}");
        }
    }
}
