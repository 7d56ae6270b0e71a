//! Network side of the repository: branch lookup, fetch and push

use crate::{Error, Result};
use git2::{AutotagOption, ErrorCode, FetchOptions, PushOptions, RemoteCallbacks, Repository};
use std::cell::RefCell;
use tracing::debug;

/// Callbacks that try ssh-agent, then the configured credential helper
pub(super) fn callbacks<'a>(repo: &Repository) -> RemoteCallbacks<'a> {
    let cfg = repo.config().ok();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username_from_url, allowed| {
        if allowed.is_ssh_key()
            && let Some(user) = username_from_url
        {
            return git2::Cred::ssh_key_from_agent(user);
        }
        if allowed.is_user_pass_plaintext()
            && let Some(ref cfg) = cfg
            && let Ok(cred) = git2::Cred::credential_helper(cfg, url, username_from_url)
        {
            return Ok(cred);
        }
        git2::Cred::default()
    });
    callbacks
}

/// Whether `remote_name` has `branch`.
///
/// Fetches just that ref into a scratch reference instead of listing the
/// remote's heads, so an empty remote needs no special casing.
pub(super) fn has_branch(repo: &Repository, remote_name: &str, branch: &str) -> Result<bool> {
    let scratch = format!("refs/flatworm/check/{remote_name}/{branch}");
    drop_ref(repo, &scratch)?;

    let mut remote = repo.find_remote(remote_name)?;
    let refspec = format!("+refs/heads/{branch}:{scratch}");
    let mut fo = FetchOptions::new();
    fo.remote_callbacks(callbacks(repo))
        .download_tags(AutotagOption::None);

    // A missing source ref is not an error; the scratch ref just never appears
    remote.fetch(&[refspec.as_str()], Some(&mut fo), None)?;

    let found = match repo.find_reference(&scratch) {
        Ok(_) => true,
        Err(e) if e.code() == ErrorCode::NotFound => false,
        Err(e) => return Err(e.into()),
    };
    drop_ref(repo, &scratch)?;

    debug!("{} has branch {}: {}", remote_name, branch, found);
    Ok(found)
}

fn drop_ref(repo: &Repository, name: &str) -> Result<()> {
    match repo.find_reference(name) {
        Ok(mut reference) => Ok(reference.delete()?),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Fetch `branch` into its remote-tracking ref
pub(super) fn fetch_branch(repo: &Repository, remote_name: &str, branch: &str) -> Result<()> {
    let mut remote = repo.find_remote(remote_name)?;
    let refspec = format!("+refs/heads/{branch}:refs/remotes/{remote_name}/{branch}");

    let mut fo = FetchOptions::new();
    fo.remote_callbacks(callbacks(repo));
    remote.fetch(&[refspec.as_str()], Some(&mut fo), None)?;

    debug!("Fetched {}/{}", remote_name, branch);
    Ok(())
}

/// Push `branch` without forcing; a server-side refusal becomes `PushRejected`
pub(super) fn push_branch(repo: &Repository, remote_name: &str, branch: &str) -> Result<()> {
    let mut remote = repo.find_remote(remote_name)?;
    let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");

    let rejection: RefCell<Option<String>> = RefCell::new(None);
    {
        let mut callbacks = callbacks(repo);
        callbacks.push_update_reference(|_ref_name, status| {
            if let Some(msg) = status {
                *rejection.borrow_mut() = Some(msg.to_string());
            }
            Ok(())
        });

        let mut push_options = PushOptions::new();
        push_options.remote_callbacks(callbacks);

        if let Err(e) = remote.push(&[refspec.as_str()], Some(&mut push_options)) {
            let msg = e.message().to_string();
            if msg.contains("non-fast-forward")
                || msg.contains("fetch first")
                || msg.contains("cannot lock ref")
                || msg.contains("failed to update ref")
            {
                return Err(Error::PushRejected {
                    branch: branch.to_string(),
                    message: msg,
                });
            }
            return Err(e.into());
        }
    }

    if let Some(message) = rejection.into_inner() {
        return Err(Error::PushRejected {
            branch: branch.to_string(),
            message,
        });
    }

    Ok(())
}
