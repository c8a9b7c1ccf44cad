//! Turning user-supplied repository references into clonable addresses.

use url::Url;

use crate::types::RepoReference;

/// Path segments that hosting web UIs put between `org/repo` and the branch:
/// `tree` (GitHub, GitLab) and `src` (Bitbucket, Gitea).
const BROWSE_MARKERS: &[&str] = &["tree", "src"];

/// Parse a clone URL or a browse URL (`.../tree/<branch>/<path>`,
/// `.../src/<branch>/<path>`) into a [`RepoReference`].
///
/// SSH references are passed through untouched. Anything that does not look
/// like a browse URL is used verbatim as the base URL.
pub fn parse_repo_url(input: &str) -> RepoReference {
    let raw = input.trim();
    if is_ssh_reference(raw) {
        return RepoReference::whole(raw);
    }

    let Ok(url) = Url::parse(raw) else {
        return RepoReference::whole(raw);
    };
    if !matches!(url.scheme(), "http" | "https") {
        return RepoReference::whole(raw);
    }
    let Some(segments) = url.path_segments() else {
        return RepoReference::whole(raw);
    };
    let segments: Vec<&str> = segments.filter(|s| !s.is_empty()).collect();

    // org/repo must precede the marker, and a branch must follow it.
    let Some(marker) = segments
        .iter()
        .enumerate()
        .skip(2)
        .find(|&(i, s)| BROWSE_MARKERS.contains(s) && i + 1 < segments.len())
        .map(|(i, _)| i)
    else {
        return RepoReference::whole(raw);
    };

    // GitLab spells it `/-/tree/...`.
    let repo_end = if segments[marker - 1] == "-" {
        marker - 1
    } else {
        marker
    };
    if repo_end < 2 {
        return RepoReference::whole(raw);
    }

    let mut base = url.clone();
    base.set_path(&segments[..repo_end].join("/"));
    base.set_query(None);
    base.set_fragment(None);

    RepoReference {
        base_url: base.as_str().trim_end_matches('/').to_string(),
        branch: segments[marker + 1].to_string(),
        sub_path: segments[marker + 2..].join("/"),
    }
}

/// `user@host:org/repo.git` style reference (scp-like syntax, no scheme).
pub fn is_ssh_reference(raw: &str) -> bool {
    if raw.contains("://") {
        return false;
    }
    match (raw.find('@'), raw.find(':')) {
        (Some(at), Some(colon)) => at < colon,
        _ => false,
    }
}

/// Web address of a repository, suitable for building compare/PR links.
pub fn normalize_repo_web_url(remote: &str) -> String {
    let base = parse_repo_url(remote).base_url;
    let base = base.trim();

    if is_ssh_reference(base)
        && let Some((user_host, path)) = base.split_once(':')
    {
        let host = user_host.rsplit('@').next().unwrap_or(user_host);
        return format!("https://{host}/{}", strip_git_suffix(path.trim_matches('/')));
    }

    if let Ok(url) = Url::parse(base)
        && let Some(host) = url.host_str()
    {
        let scheme = match url.scheme() {
            "ssh" | "git" => "https",
            other => other,
        };
        let path = strip_git_suffix(url.path().trim_matches('/'));
        return if path.is_empty() {
            format!("{scheme}://{host}")
        } else {
            format!("{scheme}://{host}/{path}")
        };
    }

    strip_git_suffix(base.trim_matches('/')).to_string()
}

fn strip_git_suffix(path: &str) -> &str {
    path.strip_suffix(".git").unwrap_or(path)
}
