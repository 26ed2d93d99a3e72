// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! MAC vendor lookup and spoofing heuristics.

use lru::LruCache;
use net::{Mac, Oui};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use tracing::info;

const CACHE_CAPACITY: usize = 4096;

/// Built-in OUI table: the prefixes most likely to appear on the segments
/// this sensor watches. Extendable at construction time.
const BUILTIN_OUI: &[(&str, &str)] = &[
    // Cisco
    ("00:00:0C", "Cisco"),
    ("00:01:42", "Cisco"),
    ("00:01:43", "Cisco"),
    ("00:01:63", "Cisco"),
    ("00:01:64", "Cisco"),
    ("00:01:96", "Cisco"),
    ("00:01:97", "Cisco"),
    ("00:01:C7", "Cisco"),
    ("00:02:16", "Cisco"),
    ("00:02:3D", "Cisco"),
    ("00:02:4A", "Cisco"),
    ("00:02:B9", "Cisco"),
    ("00:02:FC", "Cisco"),
    ("00:03:31", "Cisco"),
    ("00:03:6B", "Cisco"),
    ("00:03:9F", "Cisco"),
    ("00:03:E3", "Cisco"),
    ("00:03:FD", "Cisco"),
    // HP
    ("00:00:0D", "HP"),
    ("00:01:E6", "HP"),
    ("00:02:A5", "HP"),
    ("00:04:EA", "HP"),
    ("00:08:02", "HP"),
    ("00:0B:CD", "HP"),
    ("00:0E:7F", "HP"),
    ("00:0F:20", "HP"),
    ("00:10:83", "HP"),
    ("00:11:0A", "HP"),
    ("00:12:79", "HP"),
    ("00:13:21", "HP"),
    ("00:14:38", "HP"),
    ("00:15:60", "HP"),
    ("00:16:35", "HP"),
    ("00:17:08", "HP"),
    ("00:18:FE", "HP"),
    ("00:19:BB", "HP"),
    ("00:1A:4B", "HP"),
    ("00:1B:3F", "HP"),
    ("00:1C:2E", "HP"),
    ("00:1E:0B", "HP"),
    ("00:1F:29", "HP"),
    ("00:21:5A", "HP"),
    ("00:22:64", "HP"),
    ("00:23:7D", "HP"),
    ("00:24:81", "HP"),
    ("00:25:B3", "HP"),
    ("00:26:55", "HP"),
    // Dell
    ("00:06:5B", "Dell"),
    ("00:08:74", "Dell"),
    ("00:0B:DB", "Dell"),
    ("00:0D:56", "Dell"),
    ("00:0F:1F", "Dell"),
    ("00:11:43", "Dell"),
    ("00:12:3F", "Dell"),
    ("00:13:72", "Dell"),
    ("00:14:22", "Dell"),
    ("00:15:C5", "Dell"),
    ("00:16:F0", "Dell"),
    ("00:18:8B", "Dell"),
    ("00:19:B9", "Dell"),
    ("00:1A:A0", "Dell"),
    ("00:1C:23", "Dell"),
    ("00:1D:09", "Dell"),
    ("00:1E:4F", "Dell"),
    ("00:21:70", "Dell"),
    ("00:22:19", "Dell"),
    ("00:23:AE", "Dell"),
    ("00:24:E8", "Dell"),
    ("00:25:64", "Dell"),
    ("00:26:B9", "Dell"),
    // Intel
    ("00:02:B3", "Intel"),
    ("00:03:47", "Intel"),
    ("00:04:23", "Intel"),
    ("00:07:E9", "Intel"),
    ("00:0C:F1", "Intel"),
    ("00:0E:0C", "Intel"),
    ("00:11:11", "Intel"),
    ("00:12:F0", "Intel"),
    ("00:13:02", "Intel"),
    ("00:13:20", "Intel"),
    ("00:13:CE", "Intel"),
    ("00:15:00", "Intel"),
    ("00:15:17", "Intel"),
    ("00:16:6F", "Intel"),
    ("00:16:EA", "Intel"),
    ("00:18:DE", "Intel"),
    ("00:19:D1", "Intel"),
    ("00:1B:21", "Intel"),
    ("00:1B:77", "Intel"),
    ("00:1C:BF", "Intel"),
    ("00:1D:E0", "Intel"),
    ("00:1E:64", "Intel"),
    ("00:1E:67", "Intel"),
    ("00:1F:3A", "Intel"),
    // Broadcom
    ("00:10:18", "Broadcom"),
    ("00:14:A4", "Broadcom"),
    ("00:17:42", "Broadcom"),
    ("00:19:A6", "Broadcom"),
    ("00:1C:C0", "Broadcom"),
    ("00:1E:8C", "Broadcom"),
    ("00:25:9C", "Broadcom"),
    // Realtek
    ("00:E0:4C", "Realtek"),
    ("52:54:00", "Realtek"),
    ("00:01:6C", "Realtek"),
    ("00:0B:6A", "Realtek"),
    ("00:0C:76", "Realtek"),
    ("00:0E:2E", "Realtek"),
    ("00:11:D8", "Realtek"),
    ("00:13:46", "Realtek"),
    ("00:15:E9", "Realtek"),
    ("00:19:21", "Realtek"),
    ("00:1C:4A", "Realtek"),
    ("00:1D:60", "Realtek"),
    ("00:1F:1F", "Realtek"),
    ("00:21:27", "Realtek"),
    ("00:24:1D", "Realtek"),
    // Apple
    ("00:03:93", "Apple"),
    ("00:0A:27", "Apple"),
    ("00:0A:95", "Apple"),
    ("00:0D:93", "Apple"),
    ("00:10:FA", "Apple"),
    ("00:11:24", "Apple"),
    ("00:14:51", "Apple"),
    ("00:16:CB", "Apple"),
    ("00:17:F2", "Apple"),
    ("00:19:E3", "Apple"),
    ("00:1B:63", "Apple"),
    ("00:1C:B3", "Apple"),
    ("00:1D:4F", "Apple"),
    ("00:1E:52", "Apple"),
    ("00:1F:5B", "Apple"),
    ("00:21:E9", "Apple"),
    ("00:22:41", "Apple"),
    ("00:23:12", "Apple"),
    ("00:23:6C", "Apple"),
    ("00:24:36", "Apple"),
    ("00:25:00", "Apple"),
    ("00:25:4B", "Apple"),
    ("00:26:08", "Apple"),
    ("00:26:4A", "Apple"),
    ("00:26:B0", "Apple"),
    // VMware / VirtualBox
    ("00:0C:29", "VMware"),
    ("00:05:69", "VMware"),
    ("00:1C:14", "VMware"),
    ("00:50:56", "VMware"),
    ("08:00:27", "VirtualBox"),
    // Microsoft
    ("00:03:FF", "Microsoft"),
    ("00:0D:3A", "Microsoft"),
    ("00:12:5A", "Microsoft"),
    ("00:15:5D", "Microsoft"),
    ("00:17:FA", "Microsoft"),
    ("00:1D:D8", "Microsoft"),
    ("00:22:48", "Microsoft"),
    ("00:25:AE", "Microsoft"),
    // D-Link
    ("00:05:5D", "D-Link"),
    ("00:0D:88", "D-Link"),
    ("00:11:95", "D-Link"),
    ("00:17:9A", "D-Link"),
    ("00:19:5B", "D-Link"),
    ("00:1B:11", "D-Link"),
    ("00:1C:F0", "D-Link"),
    ("00:1E:58", "D-Link"),
    ("00:22:B0", "D-Link"),
    ("00:24:01", "D-Link"),
    ("00:26:5A", "D-Link"),
    // TP-Link
    ("00:27:19", "TP-Link"),
    ("10:FE:ED", "TP-Link"),
    ("14:CF:92", "TP-Link"),
    ("18:D6:C7", "TP-Link"),
    ("1C:3B:F3", "TP-Link"),
    ("24:A4:3C", "TP-Link"),
    ("50:C7:BF", "TP-Link"),
    ("54:A0:50", "TP-Link"),
    ("64:66:B3", "TP-Link"),
    ("84:16:F9", "TP-Link"),
    ("90:F6:52", "TP-Link"),
    ("C0:25:E9", "TP-Link"),
    ("E8:DE:27", "TP-Link"),
    ("F4:F2:6D", "TP-Link"),
    ("F8:1A:67", "TP-Link"),
];

/// Heuristic verdict over one frame's MAC pair.
#[derive(Debug, Clone)]
pub struct VendorAssessment {
    /// Bounded sum of signal weights, in `[0, 1]`.
    pub confidence: f64,
    pub anomalies: Vec<String>,
    pub src_vendor: Option<String>,
    pub dst_vendor: Option<String>,
}

/// Serializable vendor-checker counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VendorStats {
    pub oui_entries: usize,
    pub cached_lookups: usize,
    pub unique_vendors: usize,
}

/// OUI-based vendor lookup with a per-full-MAC LRU memo.
pub struct VendorChecker {
    oui: HashMap<Oui, String>,
    cache: Mutex<LruCache<Mac, Option<String>>>,
}

impl Default for VendorChecker {
    fn default() -> Self {
        VendorChecker::new()
    }
}

impl VendorChecker {
    /// Build a checker over the built-in table.
    #[must_use]
    pub fn new() -> Self {
        let mut oui = HashMap::with_capacity(BUILTIN_OUI.len());
        for (prefix, vendor) in BUILTIN_OUI {
            if let Ok(key) = Oui::try_from(*prefix) {
                oui.insert(key, (*vendor).to_owned());
            }
        }
        info!("vendor checker loaded {} OUI entries", oui.len());
        #[allow(clippy::unwrap_used)] // CACHE_CAPACITY is a non-zero constant
        let cache = LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap());
        VendorChecker {
            oui,
            cache: Mutex::new(cache),
        }
    }

    /// Extend the table with additional `(oui, vendor)` pairs, e.g. from a
    /// site-local file. Later entries win.
    pub fn extend<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (Oui, String)>,
    {
        for (key, vendor) in entries {
            self.oui.insert(key, vendor);
        }
        self.cache.lock().clear();
    }

    /// Vendor for a MAC, memoized per full address.
    #[must_use]
    pub fn lookup(&self, mac: Mac) -> Option<String> {
        let mut cache = self.cache.lock();
        if let Some(hit) = cache.get(&mac) {
            return hit.clone();
        }
        let vendor = self.oui.get(&mac.oui()).cloned();
        cache.put(mac, vendor.clone());
        vendor
    }

    /// Score spoofing heuristics over a source/destination MAC pair.
    #[must_use]
    pub fn check(&self, src_mac: Mac, dst_mac: Mac) -> VendorAssessment {
        let mut confidence: f64 = 0.0;
        let mut anomalies = Vec::new();

        let src_vendor = self.lookup(src_mac);
        let dst_vendor = self.lookup(dst_mac);

        if src_vendor.is_none() {
            anomalies.push(format!(
                "Unknown source MAC vendor (OUI: {})",
                src_mac.oui()
            ));
            confidence += 0.3;
        }
        if dst_vendor.is_none() {
            anomalies.push(format!(
                "Unknown destination MAC vendor (OUI: {})",
                dst_mac.oui()
            ));
            confidence += 0.1;
        }
        if src_mac.is_broadcast() || src_mac.is_multicast() {
            anomalies.push("Source MAC is broadcast/multicast (spoofing indicator)".to_owned());
            confidence += 0.4;
        }
        if src_mac.is_locally_administered() {
            anomalies.push("Source MAC is locally administered (potential spoofing)".to_owned());
            confidence += 0.2;
        }

        VendorAssessment {
            confidence: confidence.min(1.0),
            anomalies,
            src_vendor,
            dst_vendor,
        }
    }

    #[must_use]
    pub fn stats(&self) -> VendorStats {
        let unique: std::collections::HashSet<&str> =
            self.oui.values().map(String::as_str).collect();
        VendorStats {
            oui_entries: self.oui.len(),
            cached_lookups: self.cache.lock().len(),
            unique_vendors: unique.len(),
        }
    }
}
