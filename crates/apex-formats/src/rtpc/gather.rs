use super::{NodeInfo, PropInfo, PropType, PropValue, RtpcVisitor};
use crate::error::FormatResult;
use std::collections::BTreeSet;

/// Object record gathered from one RTPC node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpcObject {
    /// Position of the node header
    pub offset: usize,
    /// `_class` property
    pub class_name: Option<Vec<u8>>,
    /// `name` property
    pub name: Option<Vec<u8>>,
    /// `_object_id` property
    pub object_id: Option<i64>,
    /// Every object id property of the node
    pub object_refs: Vec<i64>,
    /// Every event id of the node
    pub event_refs: Vec<i64>,
}

/// Collects strings and per-node object records
#[derive(Debug, Default)]
pub struct RtpcGather {
    /// Every string property value
    pub strings: BTreeSet<Vec<u8>>,
    /// One record per node, in completion order
    pub objects: Vec<RtpcObject>,
    open: Vec<RtpcObject>,
    h_class: u32,
    h_name: u32,
    h_object_id: u32,
}

impl RtpcGather {
    /// Create an empty gatherer
    pub fn new() -> Self {
        Self {
            h_class: apex_hash::hash32(b"_class"),
            h_name: apex_hash::hash32(b"name"),
            h_object_id: apex_hash::hash32(b"_object_id"),
            ..Self::default()
        }
    }
}

impl RtpcVisitor for RtpcGather {
    fn node_start(&mut self, _buf: &[u8], _index: usize, node: &NodeInfo) -> FormatResult<()> {
        self.open.push(RtpcObject {
            offset: node.pos,
            ..RtpcObject::default()
        });
        Ok(())
    }

    fn node_end(&mut self, _buf: &[u8], _index: usize, _node: &NodeInfo) -> FormatResult<()> {
        if let Some(obj) = self.open.pop() {
            self.objects.push(obj);
        }
        Ok(())
    }

    fn prop(&mut self, buf: &[u8], _index: usize, prop: &PropInfo) -> FormatResult<()> {
        if !matches!(
            prop.prop_type,
            PropType::Str | PropType::ObjectId | PropType::Event
        ) {
            return Ok(());
        }
        let value = prop.value(buf)?;
        let Some(obj) = self.open.last_mut() else {
            return Ok(());
        };
        match value {
            PropValue::Str(s) => {
                if prop.name_hash == self.h_class {
                    obj.class_name = Some(s.clone());
                } else if prop.name_hash == self.h_name {
                    obj.name = Some(s.clone());
                }
                self.strings.insert(s);
            }
            PropValue::ObjectId(id) => {
                obj.object_refs.push(id);
                if prop.name_hash == self.h_object_id {
                    obj.object_id = Some(id);
                }
            }
            PropValue::Events(ids) => obj.event_refs.extend(ids),
            _ => {}
        }
        Ok(())
    }
}
