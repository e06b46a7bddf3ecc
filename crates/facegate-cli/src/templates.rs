use std::path::PathBuf;

use facegate_core::errors::{AppError, AppResult};
use facegate_core::faces::store::{EnvKeyProvider, TemplateStore, TemplateSummary};
use facegate_core::identity::IdentityId;
use serde::Serialize;

use crate::cli::{TemplateListArgs, TemplateRemoveArgs};
use crate::runtime::{open_template_store, resolve_config};

#[derive(Debug, Serialize)]
pub struct TemplateListOutcome {
    pub store_path: PathBuf,
    pub templates: Vec<TemplateSummary>,
}

#[derive(Debug, Serialize)]
pub struct TemplateRemovalOutcome {
    pub store_path: PathBuf,
    pub user: IdentityId,
    pub remaining: usize,
}

pub fn run_template_list(args: &TemplateListArgs) -> AppResult<TemplateListOutcome> {
    let config = resolve_config(&args.runtime)?.resolved;
    let store = open_template_store(&config, &EnvKeyProvider)?;
    Ok(TemplateListOutcome {
        store_path: store.path().to_path_buf(),
        templates: store.list()?,
    })
}

pub fn run_template_remove(args: &TemplateRemoveArgs) -> AppResult<TemplateRemovalOutcome> {
    let config = resolve_config(&args.runtime)?.resolved;
    let store = open_template_store(&config, &EnvKeyProvider)?;
    let user = IdentityId::new(args.user.clone())?;
    remove_from(&store, user).map(|(user, remaining)| TemplateRemovalOutcome {
        store_path: store.path().to_path_buf(),
        user,
        remaining,
    })
}

/// Removes `user`'s template; an identity with nothing enrolled is an error.
pub fn remove_from(store: &dyn TemplateStore, user: IdentityId) -> AppResult<(IdentityId, usize)> {
    if !store.remove(&user)? {
        return Err(AppError::TemplateNotFound {
            identity: user.to_string(),
        });
    }
    Ok((user, store.list()?.len()))
}
