//! Policy engine: matching callbacks to handler methods.
//!
//! A [`Policy`] extracts a [`Key`](crate::Key) from a callback and compares
//! it with the keys methods are declared for, under the policy's
//! [`Variance`]:
//!
//! ```text
//! callback ──key_of──▶ Key ──┐
//!                            ├──▶ Variance::matches ──▶ ranked candidates ──▶ approval ──▶ invoke
//! descriptor ──methods──▶ Key┘
//! ```
//!
//! Methods are declared through a [`DescriptorBuilder`], normally from a
//! [`Describe`] implementation, and cached per handler type in a
//! [`HandlerDescriptor`].

mod definition;
mod descriptor;
mod dispatch;
pub mod variance;

pub use definition::{Policy, PolicyBuilder, Resolution};
pub use descriptor::{
    Candidate, Describe, DescriptorBuilder, HandlerDescriptor, MethodConfig, MethodDescriptor,
};
pub use dispatch::{IntoReply, Invocation, Reply, dispatch};
pub use variance::{Match, Variance};
