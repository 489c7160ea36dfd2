//! Plugkeys – interned keys and pluggable behaviors for a persistent game world.
//!
//! Two mechanisms live here, and they lean on each other:
//! * *Interned keys*: a [`key::Key`] is an immutable `(name, id)` pair handed
//!   out by a [`key::KeyRegistry`], which guarantees one key per
//!   case-insensitive name. Once resolved, keys compare and hash by id only.
//!   Every kind ([`key::TagKey`], [`key::PluginKey`], [`key::TriggerKey`]) is
//!   its own type, so keys of different kinds are never equal.
//! * *Plugins*: a [`def::PluginDef`] is a loaded, static description of a
//!   behavior; [`def::PluginDef::create`] makes a [`plugin::Plugin`] instance
//!   which a [`holder::PluginHolder`] attaches under a plugin key. Triggers are
//!   delivered by key, either strictly (first failure aborts and is returned)
//!   or best effort (everything runs, failures go to a diagnostic sink).
//!
//! ## Modules
//! * [`key`] – id generator, key kinds, registries and the [`key::KeySpace`] bundling them.
//! * [`def`] – behavior definitions and the catalog they are loaded into.
//! * [`plugin`] – behavior instances and their `Unattached → Attached → Detached` lifecycle.
//! * [`dispatch`] – trigger delivery policies, outcomes and diagnostic sinks.
//! * [`holder`] – the container owning attached plugins and tags.
//! * [`persist`] – the `@@name` plugin key codec and saving/loading holders as text.
//! * [`settings`] – configuration read through the `config` crate.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use plugkeys::{def::{PluginDef, Provenance}, dispatch::{ScriptArgs, SilentSink, TriggerResult}};
//! use plugkeys::{holder::PluginHolder, key::KeySpace};
//!
//! let keys = Arc::new(KeySpace::default());
//! let hit = keys.trigger("hit");
//! let def = PluginDef::builder("p_armor", Provenance::new("armor.scp", 1))
//!     .field("absorbed", 0)
//!     .on(&hit, |ctx, _args| {
//!         let absorbed = ctx.field("absorbed").and_then(|v| v.as_i64()).unwrap_or(0);
//!         ctx.set_field("absorbed", absorbed + 1);
//!         Ok(TriggerResult::Continue)
//!     })
//!     .build();
//! let mut holder = PluginHolder::new(Arc::clone(&keys), Arc::new(SilentSink));
//! let armor = keys.plugin("Armor");
//! holder.add_new_plugin(&armor, &def).unwrap();
//! holder.trigger(&hit, &ScriptArgs::new()).unwrap();
//! assert_eq!(holder.get_plugin(&keys.plugin("ARMOR")).unwrap().field("absorbed"), Some(&serde_json::Value::from(1)));
//! ```

pub mod def;
pub mod dispatch;
pub mod error;
pub mod holder;
pub mod key;
pub mod persist;
pub mod plugin;
pub mod settings;
