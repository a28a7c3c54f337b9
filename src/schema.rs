//! Schema registry: two-phase resolution of declarative descriptors into a
//! handle table of type definitions, plus the derived decision-state table.
//!
//! References are stored as `TypeId` handles into one `Vec<TypeDef>` and are
//! never inlined, so self-referential graphs (a `tree` whose fields are
//! `optional[tree]`) stay representable while every instance built against
//! them remains finite and acyclic.
//!
//! The registry is built once, is immutable afterwards, and is shared
//! read-only by the codec and the padder.

use std::collections::HashMap;

use log::debug;

use crate::decl::{Descriptor, from_json_with_path};
use crate::error::SchemaError;

// ------------------------------- Handles ---------------------------------- //

/// Index into the schema's definition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index into the schema's state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateId(pub(crate) u32);

impl StateId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ----------------------------- Definitions -------------------------------- //

/// Pre-registered primitive scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseKind {
    Int,
    Float,
    Bool,
}

/// Closed four-kind type definition; both the registry and the codec match
/// on it exhaustively.
#[derive(Debug, Clone)]
pub enum TypeDef {
    Base { name: String, kind: BaseKind },
    Object { name: String, fields: Vec<FieldDef> },
    Enum { name: String, options: Vec<String> },
    Optional { name: String, inner: TypeId },
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            TypeDef::Base { name, .. }
            | TypeDef::Object { name, .. }
            | TypeDef::Enum { name, .. }
            | TypeDef::Optional { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeId,
    /// Decision states of the field's non-object spine: a chain of presence
    /// states followed by at most one scalar/choice leaf. Empty when the
    /// field's type is an object (its own fields carry its states).
    pub(crate) steps: Vec<StateId>,
}

// -------------------------------- States ---------------------------------- //

/// What kind of decision a state asks of the sequence model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateKind {
    Scalar(BaseKind),
    Presence,
    Choice { options: u32 },
}

impl StateKind {
    /// Width of the per-step output vector: one cell for scalars and
    /// presence flags, a one-hot row for choices.
    pub fn arity(&self) -> usize {
        match self {
            StateKind::Choice { options } => *options as usize,
            StateKind::Scalar(_) | StateKind::Presence => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInfo {
    pub name: String,
    pub kind: StateKind,
}

// ------------------------------- Registry --------------------------------- //

const PRIMITIVES: &[(&str, BaseKind)] = &[
    ("int", BaseKind::Int),
    ("float", BaseKind::Float),
    ("bool", BaseKind::Bool),
];

/// The resolved, immutable type graph plus its decision-state table.
#[derive(Debug, Clone)]
pub struct Schema {
    types: Vec<TypeDef>,
    names: HashMap<String, TypeId>,
    states: Vec<StateInfo>,
    root: TypeId,
    /// Spine states of a non-object root type; empty for object roots.
    root_steps: Vec<StateId>,
}

impl Schema {
    /// Parse a descriptor document and build the registry.
    pub fn from_json(src: &str) -> Result<Self, SchemaError> {
        Self::build(from_json_with_path(src)?.types)
    }

    /// Two-phase build: register a handle for every declared name first, so
    /// forward and self references exist before any body is resolved; then
    /// resolve every reference against the handle table.
    pub fn build(decls: Vec<Descriptor>) -> Result<Self, SchemaError> {
        if decls.is_empty() {
            return Err(SchemaError::Empty);
        }

        // Phase 1: primitives, then one placeholder per named descriptor.
        let mut types = Vec::<TypeDef>::new();
        let mut names = HashMap::<String, TypeId>::new();
        for (name, kind) in PRIMITIVES {
            let id = TypeId(types.len() as u32);
            types.push(TypeDef::Base {
                name: (*name).to_string(),
                kind: *kind,
            });
            names.insert((*name).to_string(), id);
        }

        let mut declared = Vec::<TypeId>::with_capacity(decls.len());
        for decl in &decls {
            let name = match decl {
                Descriptor::Object { name, .. } | Descriptor::Enum { name, .. } => name.clone(),
                Descriptor::Optional { inner } => format!("optional[{inner}]"),
            };
            if names.contains_key(&name) {
                return Err(SchemaError::DuplicateName(name));
            }
            let id = TypeId(types.len() as u32);
            // Placeholder body; phase 2 overwrites it.
            types.push(TypeDef::Object {
                name: name.clone(),
                fields: Vec::new(),
            });
            names.insert(name, id);
            declared.push(id);
        }

        // Phase 2: resolve references into handles. `optional[X]` shorthands
        // auto-register at most once (by their derived name).
        for (decl, id) in decls.iter().zip(declared.iter().copied()) {
            let def = match decl {
                Descriptor::Object { name, fields } => {
                    let mut out = Vec::with_capacity(fields.len());
                    for (field, reference) in fields {
                        let ty = resolve(&mut types, &mut names, name, reference)?;
                        out.push(FieldDef {
                            name: field.clone(),
                            ty,
                            steps: Vec::new(),
                        });
                    }
                    TypeDef::Object {
                        name: name.clone(),
                        fields: out,
                    }
                }
                Descriptor::Enum { name, options } => {
                    if options.is_empty() {
                        return Err(SchemaError::EmptyEnum(name.clone()));
                    }
                    TypeDef::Enum {
                        name: name.clone(),
                        options: options.clone(),
                    }
                }
                Descriptor::Optional { inner } => {
                    let owner = format!("optional[{inner}]");
                    let ty = resolve(&mut types, &mut names, &owner, inner)?;
                    TypeDef::Optional { name: owner, inner: ty }
                }
            };
            types[id.index()] = def;
        }

        let root = declared[0];
        let mut schema = Schema {
            types,
            names,
            states: Vec::new(),
            root,
            root_steps: Vec::new(),
        };
        schema.assign_states();

        debug!(
            "schema: {} types, {} states, root `{}`",
            schema.types.len(),
            schema.states.len(),
            schema.ty(schema.root).name()
        );
        Ok(schema)
    }

    // --------------------------- Accessors -------------------------------- //

    /// Handle of the first-declared type: the schema's entry point.
    pub fn root(&self) -> TypeId {
        self.root
    }

    /// Definition behind a handle. Handles are only meaningful for the
    /// schema that issued them.
    pub fn ty(&self, id: TypeId) -> &TypeDef {
        &self.types[id.index()]
    }

    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.names.get(name).copied()
    }

    pub fn types(&self) -> &[TypeDef] {
        &self.types
    }

    pub fn states(&self) -> &[StateInfo] {
        &self.states
    }

    pub fn state(&self, id: StateId) -> Option<&StateInfo> {
        self.states.get(id.index())
    }

    pub(crate) fn root_steps(&self) -> &[StateId] {
        &self.root_steps
    }

    // ----------------------------- States --------------------------------- //

    /// Derive the finite decision-state table. States are per field
    /// *position*, so two fields sharing one `optional[tree]` definition
    /// still get distinct `left.presence` / `right.presence` states.
    fn assign_states(&mut self) {
        // Plan first, write back second: the spine walk reads the type table
        // while field steps live inside it.
        let mut planned: Vec<(usize, usize, Vec<StateId>)> = Vec::new();
        for ti in 0..self.types.len() {
            let TypeDef::Object { fields, .. } = &self.types[ti] else {
                continue;
            };
            let positions: Vec<(String, TypeId)> =
                fields.iter().map(|f| (f.name.clone(), f.ty)).collect();
            for (fi, (fname, fty)) in positions.into_iter().enumerate() {
                let chain = self.spine_states(fty, &fname);
                planned.push((ti, fi, chain));
            }
        }
        for (ti, fi, chain) in planned {
            if let TypeDef::Object { fields, .. } = &mut self.types[ti] {
                fields[fi].steps = chain;
            }
        }

        if !matches!(self.ty(self.root), TypeDef::Object { .. }) {
            let prefix = self.ty(self.root).name().to_string();
            self.root_steps = self.spine_states(self.root, &prefix);
        }
    }

    /// States emitted along one field position's spine. Objects stop the
    /// recursion; optional spines always terminate because an `optional[X]`
    /// name strictly contains its inner reference.
    fn spine_states(&mut self, ty: TypeId, prefix: &str) -> Vec<StateId> {
        match &self.types[ty.index()] {
            TypeDef::Object { .. } => Vec::new(),
            TypeDef::Base { kind, .. } => {
                let kind = *kind;
                vec![self.push_state(prefix.to_string(), StateKind::Scalar(kind))]
            }
            TypeDef::Enum { options, .. } => {
                let options = options.len() as u32;
                vec![self.push_state(prefix.to_string(), StateKind::Choice { options })]
            }
            TypeDef::Optional { inner, .. } => {
                let inner = *inner;
                let mut chain =
                    vec![self.push_state(format!("{prefix}.presence"), StateKind::Presence)];
                let inner_prefix = match &self.types[inner.index()] {
                    // nested optionals need a fresh namespace level
                    TypeDef::Optional { .. } => format!("{prefix}.inner"),
                    _ => prefix.to_string(),
                };
                chain.extend(self.spine_states(inner, &inner_prefix));
                chain
            }
        }
    }

    fn push_state(&mut self, name: String, kind: StateKind) -> StateId {
        let id = StateId(self.states.len() as u32);
        self.states.push(StateInfo { name, kind });
        id
    }
}

/// Resolve one type-reference string against the handle table. A bare name
/// must already be registered; an `optional[X]` shorthand resolves `X` and
/// registers the anonymous wrapper on first sight.
fn resolve(
    types: &mut Vec<TypeDef>,
    names: &mut HashMap<String, TypeId>,
    context: &str,
    reference: &str,
) -> Result<TypeId, SchemaError> {
    if let Some(id) = names.get(reference) {
        return Ok(*id);
    }
    if let Some(inner) = reference
        .strip_prefix("optional[")
        .and_then(|r| r.strip_suffix(']'))
    {
        let inner_id = resolve(types, names, context, inner)?;
        let id = TypeId(types.len() as u32);
        types.push(TypeDef::Optional {
            name: reference.to_string(),
            inner: inner_id,
        });
        names.insert(reference.to_string(), id);
        return Ok(id);
    }
    Err(SchemaError::Unresolved {
        context: context.to_string(),
        reference: reference.to_string(),
    })
}

// --------------------------------- Tests ----------------------------------- //
