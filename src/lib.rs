//! sqlbridge: generic REST-to-SQL binding with transaction propagation.
//!
//! A structured REST query (resource, action, key, filter tree, sorts,
//! fields, pagination, body) is dispatched as a CRUD operation against a
//! registered resource, executed as a unit of work under configurable
//! transaction propagation (`Current`, `Mandatory`, `Savepoint`).

pub mod action;
pub mod backend;
pub mod engine;
pub mod error;
pub mod executor;
pub mod filter;
pub mod query;
pub mod resource;
pub mod sql;
pub mod transactional;

pub use action::{Action, ActionSet};
pub use backend::{Backend, Connection, PostgresBackend, SqliteBackend};
pub use engine::{Engine, ExecutionResult};
pub use error::Error;
pub use executor::Executor;
pub use filter::{Filter, GroupOp, Op};
pub use query::{Field, Page, Relation, RestQuery, Sort};
pub use resource::{Column, PkType, Registry, RelationKind, RelationSpec, Resource};
pub use transactional::{run, run_with_propagation, ExecContext, Propagation, UnitOfWork};
