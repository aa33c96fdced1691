//! # Comment Tree Builder
//!
//! Rebuilds the reply forest of one post from its flat comment rows. Rows are
//! placed in an arena, linked by index through a parent -> children table,
//! and materialised bottom-up with an explicit stack.
//!
//! The output nests at most [`MAX_REPLY_NESTING`] levels. Replies below that
//! level are attached, in creation order, to their ancestor at the last
//! level, so the serialised tree stays shallow however long a reply chain
//! grows. The stored `depth` of each comment is untouched.
//!
//! Pagination slices the finished top-level list, so a page always holds
//! whole threads.

use std::collections::{HashMap, VecDeque};

use domains::{Comment, PageRequest, Pagination, UserSummary};
use serde::Serialize;
use uuid::Uuid;

/// One comment with its author resolved and its live replies nested under it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,
    pub author: Option<UserSummary>,
    pub replies: Vec<CommentNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPage {
    pub comments: Vec<CommentNode>,
    pub pagination: Pagination,
}

/// Levels of `replies` the built forest nests before flattening.
pub const MAX_REPLY_NESTING: usize = 32;

enum Visit {
    Enter(usize),
    Assemble(usize),
}

/// Builds the forest. Deleted rows are skipped, and so is anything whose
/// parent is not among the live rows. Siblings are ordered by
/// `(created_at, id)` at every level.
pub fn build_forest(
    comments: Vec<Comment>,
    authors: &HashMap<Uuid, UserSummary>,
) -> Vec<CommentNode> {
    let mut live: Vec<Comment> = comments.into_iter().filter(|c| !c.is_deleted).collect();
    live.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let index: HashMap<Uuid, usize> = live.iter().enumerate().map(|(i, c)| (c.id, i)).collect();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); live.len()];
    let mut roots = Vec::new();
    for (i, comment) in live.iter().enumerate() {
        match comment.parent_comment_id {
            None => roots.push(i),
            Some(parent) => {
                if let Some(&p) = index.get(&parent) {
                    children[p].push(i);
                }
            }
        }
    }

    let attached = cap_nesting(&roots, &children);

    let mut slots: Vec<Option<Comment>> = live.into_iter().map(Some).collect();
    let mut built: Vec<Option<CommentNode>> = (0..slots.len()).map(|_| None).collect();

    // Post-order: a node is assembled once all of its children are.
    let mut stack: Vec<Visit> = roots.iter().rev().map(|&i| Visit::Enter(i)).collect();
    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(i) => {
                stack.push(Visit::Assemble(i));
                stack.extend(attached[i].iter().rev().map(|&c| Visit::Enter(c)));
            }
            Visit::Assemble(i) => {
                let Some(comment) = slots[i].take() else {
                    continue;
                };
                let replies = attached[i].iter().filter_map(|&c| built[c].take()).collect();
                let author = authors.get(&comment.author_id).cloned();
                built[i] = Some(CommentNode {
                    comment,
                    author,
                    replies,
                });
            }
        }
    }

    roots.into_iter().filter_map(|i| built[i].take()).collect()
}

/// Re-homes every node that would nest past [`MAX_REPLY_NESTING`] under its
/// ancestor on the last full level. Lists stay in arena order, which is
/// creation order.
fn cap_nesting(roots: &[usize], children: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut attached: Vec<Vec<usize>> = vec![Vec::new(); children.len()];
    let mut host: Vec<usize> = (0..children.len()).collect();
    let mut queue: VecDeque<(usize, usize)> = roots.iter().map(|&r| (r, 0)).collect();
    while let Some((i, level)) = queue.pop_front() {
        for &c in &children[i] {
            if level + 1 < MAX_REPLY_NESTING {
                attached[i].push(c);
                queue.push_back((c, level + 1));
            } else {
                host[c] = host[i];
                attached[host[i]].push(c);
                queue.push_back((c, level));
            }
        }
    }
    for list in &mut attached {
        list.sort_unstable();
    }
    attached
}

/// Keeps the requested slice of top-level threads.
pub fn paginate_threads(forest: Vec<CommentNode>, request: PageRequest) -> CommentPage {
    let pagination = Pagination::new(request, forest.len() as u64);
    let range = request.range(forest.len());
    let comments = forest
        .into_iter()
        .skip(range.start)
        .take(range.end - range.start)
        .collect();
    CommentPage {
        comments,
        pagination,
    }
}
