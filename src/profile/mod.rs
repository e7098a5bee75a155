//! Output data model understood by the profiler viewer.
//!
//! Field names follow the viewer's processed-profile format, so everything
//! here serializes with the viewer's own camelCase keys.

mod live_log;
mod strings;
mod synth;
mod write;

pub use live_log::*;
pub use strings::*;
pub use synth::*;
pub use write::*;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::Millis;

pub const PROFILE_VERSION: u32 = 27;
pub const PREPROCESSED_PROFILE_VERSION: u32 = 47;
pub const PROCESS_NAME: &str = "Taskcluster";

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub meta: ProfileMeta,
    pub libs: Vec<Value>,
    pub threads: Vec<Thread>,
    pub counters: Vec<Value>,
}

impl Profile {
    pub fn new(product: String, start_time: Millis, marker_schema: Vec<MarkerSchema>) -> Self {
        Self {
            meta: ProfileMeta {
                interval: 1,
                start_time,
                process_type: 0,
                product,
                stackwalk: 0,
                version: PROFILE_VERSION,
                preprocessed_profile_version: PREPROCESSED_PROFILE_VERSION,
                physical_cpus: 0,
                logical_cpus: 0,
                symbolication_not_supported: true,
                uses_only_one_stack_type: true,
                marker_schema,
                categories: categories(),
            },
            libs: Vec::new(),
            threads: Vec::new(),
            counters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileMeta {
    pub interval: u32,
    pub start_time: Millis,
    pub process_type: u32,
    pub product: String,
    pub stackwalk: u32,
    pub version: u32,
    pub preprocessed_profile_version: u32,
    #[serde(rename = "physicalCPUs")]
    pub physical_cpus: u32,
    #[serde(rename = "logicalCPUs")]
    pub logical_cpus: u32,
    pub symbolication_not_supported: bool,
    pub uses_only_one_stack_type: bool,
    pub marker_schema: Vec<MarkerSchema>,
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub name: &'static str,
    pub color: &'static str,
    pub subcategories: Vec<&'static str>,
}

const CATEGORIES: [(&str, &str); 7] = [
    ("none", "grey"),
    ("fetches", "purple"),
    ("vcs", "orange"),
    ("setup", "lightblue"),
    ("taskcluster", "green"),
    ("Task", "lightblue"),
    ("Log", "green"),
];

pub fn categories() -> Vec<Category> {
    CATEGORIES
        .iter()
        .map(|&(name, color)| Category {
            name,
            color,
            subcategories: vec!["Other"],
        })
        .collect()
}

/// Index of a named category, falling back to `none`.
pub fn category_index(name: &str) -> usize {
    CATEGORIES.iter().position(|&(n, _)| n == name).unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerSchema {
    pub name: &'static str,
    pub tooltip_label: &'static str,
    pub table_label: &'static str,
    pub chart_label: &'static str,
    pub display: Vec<&'static str>,
    pub data: Vec<SchemaField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaField {
    pub key: &'static str,
    pub label: &'static str,
    pub format: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub searchable: bool,
}

impl SchemaField {
    pub fn new(key: &'static str, label: &'static str, format: &'static str) -> Self {
        Self {
            key,
            label,
            format,
            searchable: false,
        }
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerPhase {
    Instant,
    Interval,
}

impl Serialize for MarkerPhase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let code: u8 = match self {
            Self::Instant => 0,
            Self::Interval => 1,
        };
        serializer.serialize_u8(code)
    }
}

/// One timeline event before it is split into the marker columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub start_time: Millis,
    pub end_time: Option<Millis>,
    pub phase: MarkerPhase,
    pub category: usize,
    pub name: usize,
    pub data: Value,
}

/// Struct-of-arrays marker storage. Columns only grow through `push`, so
/// they always have `length` entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Markers {
    data: Vec<Value>,
    name: Vec<usize>,
    start_time: Vec<Millis>,
    end_time: Vec<Option<Millis>>,
    phase: Vec<MarkerPhase>,
    category: Vec<usize>,
    length: usize,
}

impl Markers {
    pub fn push(&mut self, marker: Marker) {
        self.data.push(marker.data);
        self.name.push(marker.name);
        self.start_time.push(marker.start_time);
        self.end_time.push(marker.end_time);
        self.phase.push(marker.phase);
        self.category.push(marker.category);
        self.length += 1;
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn data(&self) -> &[Value] {
        &self.data
    }

    pub fn names(&self) -> &[usize] {
        &self.name
    }

    pub fn start_times(&self) -> &[Millis] {
        &self.start_time
    }

    pub fn end_times(&self) -> &[Option<Millis>] {
        &self.end_time
    }

    pub fn phases(&self) -> &[MarkerPhase] {
        &self.phase
    }

    pub fn categories(&self) -> &[usize] {
        &self.category
    }

    /// True when every column holds exactly `len()` entries.
    pub fn is_aligned(&self) -> bool {
        [
            self.data.len(),
            self.name.len(),
            self.start_time.len(),
            self.end_time.len(),
            self.phase.len(),
            self.category.len(),
        ]
        .iter()
        .all(|&n| n == self.length)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub process_type: &'static str,
    pub process_name: &'static str,
    pub process_startup_time: Millis,
    pub process_shutdown_time: Option<Millis>,
    pub register_time: Millis,
    pub unregister_time: Option<Millis>,
    pub paused_ranges: Vec<Value>,
    pub name: String,
    pub is_main_thread: bool,
    pub pid: i64,
    pub tid: i64,
    pub markers: Markers,
    pub string_array: UniqueStringArray,
    #[serde(flatten)]
    pub tables: Map<String, Value>,
}

impl Thread {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            process_type: "default",
            process_name: PROCESS_NAME,
            process_startup_time: 0,
            process_shutdown_time: None,
            register_time: 0,
            unregister_time: None,
            paused_ranges: Vec::new(),
            name: name.into(),
            is_main_thread: false,
            pid: 0,
            tid: 0,
            markers: Markers::default(),
            string_array: UniqueStringArray::new(),
            tables: empty_tables(),
        }
    }

    /// Interns `name` in this thread's string table and appends a marker.
    pub fn add_marker(
        &mut self,
        name: &str,
        start_time: Millis,
        end_time: Option<Millis>,
        category: usize,
        data: Value,
    ) {
        let phase = match end_time {
            Some(_) => MarkerPhase::Interval,
            None => MarkerPhase::Instant,
        };
        let name = self.string_array.index_for_string(name);
        self.markers.push(Marker {
            start_time,
            end_time,
            phase,
            category,
            name,
            data,
        });
    }
}

/// Sample and symbol tables for a thread that carries markers only.
fn empty_tables() -> Map<String, Value> {
    let tables = serde_json::json!({
        "samples": {
            "weightType": "samples",
            "weight": null,
            "stack": [],
            "time": [],
            "length": 0
        },
        "stackTable": {
            "frame": [0],
            "prefix": [null],
            "category": [0],
            "subcategory": [0],
            "length": 1
        },
        "frameTable": {
            "address": [-1],
            "inlineDepth": [0],
            "category": [null],
            "subcategory": [0],
            "func": [0],
            "nativeSymbol": [null],
            "innerWindowID": [0],
            "implementation": [null],
            "line": [null],
            "column": [null],
            "length": 1
        },
        "funcTable": {
            "isJS": [false],
            "relevantForJS": [false],
            "name": [0],
            "resource": [-1],
            "fileName": [null],
            "lineNumber": [null],
            "columnNumber": [null],
            "length": 1
        },
        "resourceTable": { "lib": [], "name": [], "host": [], "type": [], "length": 0 },
        "nativeSymbols": { "libIndex": [], "address": [], "name": [], "functionSize": [], "length": 0 }
    });
    match tables {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
