use super::region::raw_enum;
use super::{DedupTables, DefTable, Definition, DefinitionHeader, DefinitionKind, Handle};
use super::{DefinitionManager, StringDef};

use serde::{Deserialize, Serialize};

raw_enum! {
    MetricSource {
        Papi,
        Rusage,
        User,
        Other,
        TaskStack,
        Plugin,
        Perf,
    }
}

raw_enum! {
    MetricMode {
        AccumulatedStart,
        AccumulatedPoint,
        AccumulatedLast,
        AccumulatedNext,
        AbsolutePoint,
        AbsoluteLast,
        AbsoluteNext,
        RelativePoint,
        RelativeLast,
        RelativeNext,
    }
}

raw_enum! {
    MetricValueType {
        Int64,
        Uint64,
        Double,
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct MetricDef {
    header: DefinitionHeader,
    name: Handle<StringDef>,
    description: Handle<StringDef>,
    unit: Handle<StringDef>,
    source: u32,
    mode: u32,
    value_type: u32,
}

#[doc(hidden)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    name: Handle<StringDef>,
    description: Handle<StringDef>,
    unit: Handle<StringDef>,
    source: u32,
    mode: u32,
    value_type: u32,
}

unsafe impl Definition for MetricDef {
    const KIND: DefinitionKind = DefinitionKind::Metric;
    type Key = MetricKey;

    fn table(tables: &DedupTables) -> Option<&DefTable<Self>> {
        Some(&tables.metric)
    }
}

impl MetricDef {
    pub fn name(&self) -> Handle<StringDef> {
        self.name
    }

    pub fn description(&self) -> Handle<StringDef> {
        self.description
    }

    pub fn unit(&self) -> Handle<StringDef> {
        self.unit
    }

    pub fn source(&self) -> Option<MetricSource> {
        MetricSource::from_raw(self.source)
    }

    pub fn mode(&self) -> Option<MetricMode> {
        MetricMode::from_raw(self.mode)
    }

    pub fn value_type(&self) -> Option<MetricValueType> {
        MetricValueType::from_raw(self.value_type)
    }

    pub(crate) fn key(&self) -> MetricKey {
        MetricKey {
            name: self.name,
            description: self.description,
            unit: self.unit,
            source: self.source,
            mode: self.mode,
            value_type: self.value_type,
        }
    }
}

impl MetricKey {
    pub(crate) fn map_strings(&self, strings: impl Fn(Handle<StringDef>) -> Handle<StringDef>) -> MetricKey {
        MetricKey {
            name: strings(self.name),
            description: strings(self.description),
            unit: strings(self.unit),
            ..self.clone()
        }
    }
}

impl DefinitionManager {
    pub fn define_metric(
        &self,
        name: &str,
        description: &str,
        unit: &str,
        source: MetricSource,
        mode: MetricMode,
        value_type: MetricValueType,
    ) -> Handle<MetricDef> {
        self.define_metric_with_key(MetricKey {
            name: self.new_string(name),
            description: self.new_string(description),
            unit: self.new_string(unit),
            source: source as u32,
            mode: mode as u32,
            value_type: value_type as u32,
        })
    }

    pub(crate) fn define_metric_with_key(&self, key: MetricKey) -> Handle<MetricDef> {
        let hash_value = self
            .fold()
            .handle(self, key.name)
            .handle(self, key.description)
            .handle(self, key.unit)
            .u32(key.source)
            .u32(key.mode)
            .u32(key.value_type)
            .finish();
        self.add_definition(
            MetricDef {
                header: DefinitionHeader::new(hash_value),
                name: key.name,
                description: key.description,
                unit: key.unit,
                source: key.source,
                mode: key.mode,
                value_type: key.value_type,
            },
            &[],
            Some(key),
        )
    }
}
