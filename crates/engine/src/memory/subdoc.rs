//! Dotted-path access into JSON documents.
//!
//! Paths look like `name.first`, `tags[0]` or `orders[-1].total`. A negative
//! index counts from the end of the array. The empty path is the document
//! root.

use serde_json::{Map, Value};

use tether_core::ErrorCode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Field(String),
    Index(i64),
}

/// How a write treats an existing value at the target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    Upsert,
    Insert,
    Replace,
}

pub(crate) fn parse_path(path: &str) -> Result<Vec<Segment>, ErrorCode> {
    let mut segments = Vec::new();
    if path.is_empty() {
        return Ok(segments);
    }
    for part in path.split('.') {
        if part.is_empty() {
            return Err(ErrorCode::InvalidArgument);
        }
        let (field, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if !field.is_empty() {
            segments.push(Segment::Field(field.to_string()));
        }
        while !rest.is_empty() {
            let close = rest.find(']').ok_or(ErrorCode::InvalidArgument)?;
            let index: i64 = rest[1..close]
                .parse()
                .map_err(|_| ErrorCode::InvalidArgument)?;
            segments.push(Segment::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(ErrorCode::InvalidArgument);
            }
        }
    }
    Ok(segments)
}

fn resolve_index(len: usize, index: i64) -> Option<usize> {
    if index < 0 {
        let back = index.unsigned_abs() as usize;
        len.checked_sub(back)
    } else if (index as usize) < len {
        Some(index as usize)
    } else {
        None
    }
}

fn child<'a>(value: &'a Value, segment: &Segment) -> Result<&'a Value, ErrorCode> {
    match (segment, value) {
        (Segment::Field(name), Value::Object(map)) => map.get(name).ok_or(ErrorCode::PathNotFound),
        (Segment::Index(i), Value::Array(items)) => resolve_index(items.len(), *i)
            .map(|i| &items[i])
            .ok_or(ErrorCode::PathNotFound),
        _ => Err(ErrorCode::PathMismatch),
    }
}

fn child_mut<'a>(
    value: &'a mut Value,
    segment: &Segment,
    create: bool,
) -> Result<&'a mut Value, ErrorCode> {
    match (segment, value) {
        (Segment::Field(name), Value::Object(map)) => {
            if create {
                Ok(map
                    .entry(name.clone())
                    .or_insert_with(|| Value::Object(Map::new())))
            } else {
                map.get_mut(name).ok_or(ErrorCode::PathNotFound)
            }
        }
        (Segment::Index(i), Value::Array(items)) => match resolve_index(items.len(), *i) {
            Some(i) => Ok(&mut items[i]),
            None => Err(ErrorCode::PathNotFound),
        },
        _ => Err(ErrorCode::PathMismatch),
    }
}

pub(crate) fn get<'a>(root: &'a Value, path: &[Segment]) -> Result<&'a Value, ErrorCode> {
    path.iter().try_fold(root, child)
}

fn get_mut<'a>(
    root: &'a mut Value,
    path: &[Segment],
    create: bool,
) -> Result<&'a mut Value, ErrorCode> {
    let mut current = root;
    for segment in path {
        current = child_mut(current, segment, create)?;
    }
    Ok(current)
}

pub(crate) fn count(root: &Value, path: &[Segment]) -> Result<usize, ErrorCode> {
    match get(root, path)? {
        Value::Array(items) => Ok(items.len()),
        Value::Object(map) => Ok(map.len()),
        _ => Err(ErrorCode::PathMismatch),
    }
}

pub(crate) fn set(
    root: &mut Value,
    path: &[Segment],
    value: Value,
    mode: WriteMode,
    create_parents: bool,
) -> Result<(), ErrorCode> {
    let (last, parents) = path.split_last().ok_or(ErrorCode::InvalidArgument)?;
    let parent = get_mut(root, parents, create_parents)?;
    match (last, parent) {
        (Segment::Field(name), Value::Object(map)) => {
            let exists = map.contains_key(name);
            match mode {
                WriteMode::Insert if exists => return Err(ErrorCode::PathExists),
                WriteMode::Replace if !exists => return Err(ErrorCode::PathNotFound),
                _ => {}
            }
            map.insert(name.clone(), value);
            Ok(())
        }
        (Segment::Index(i), Value::Array(items)) => {
            let slot = resolve_index(items.len(), *i).ok_or(ErrorCode::PathNotFound)?;
            if mode == WriteMode::Insert {
                return Err(ErrorCode::PathExists);
            }
            items[slot] = value;
            Ok(())
        }
        _ => Err(ErrorCode::PathMismatch),
    }
}

pub(crate) fn remove(root: &mut Value, path: &[Segment]) -> Result<Value, ErrorCode> {
    let (last, parents) = path.split_last().ok_or(ErrorCode::InvalidArgument)?;
    let parent = get_mut(root, parents, false)?;
    match (last, parent) {
        (Segment::Field(name), Value::Object(map)) => {
            map.remove(name).ok_or(ErrorCode::PathNotFound)
        }
        (Segment::Index(i), Value::Array(items)) => {
            let slot = resolve_index(items.len(), *i).ok_or(ErrorCode::PathNotFound)?;
            Ok(items.remove(slot))
        }
        _ => Err(ErrorCode::PathMismatch),
    }
}

pub(crate) fn array_append(root: &mut Value, path: &[Segment], value: Value) -> Result<(), ErrorCode> {
    match get_mut(root, path, false)? {
        Value::Array(items) => {
            items.push(value);
            Ok(())
        }
        _ => Err(ErrorCode::PathMismatch),
    }
}

/// Add `delta` to the integer at `path`, creating it when absent.
pub(crate) fn counter(root: &mut Value, path: &[Segment], delta: i64) -> Result<i64, ErrorCode> {
    match get(root, path) {
        Ok(_) => {}
        Err(ErrorCode::PathNotFound) => {
            set(root, path, Value::from(delta), WriteMode::Insert, false)?;
            return Ok(delta);
        }
        Err(code) => return Err(code),
    }
    let current = get_mut(root, path, false)?;
    let base = current.as_i64().ok_or(ErrorCode::PathMismatch)?;
    let next = base.checked_add(delta).ok_or(ErrorCode::DeltaInvalid)?;
    *current = Value::from(next);
    Ok(next)
}
