//! 权限解析
//!
//! 有效权限是用户各角色直接权限名的并集。权限的父子关系只用于展示权限树，
//! 不参与授权判定。

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::database::{PermissionEntity, RoleWithPermissions};

pub fn role_names(roles: &[RoleWithPermissions]) -> Vec<String> {
    let mut seen = HashSet::new();
    roles
        .iter()
        .map(|r| r.role.name.clone())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// 去重后的有效权限名
pub fn effective_permissions(roles: &[RoleWithPermissions]) -> BTreeSet<String> {
    roles
        .iter()
        .flat_map(|r| r.permissions.iter())
        .map(|p| p.name.clone())
        .collect()
}

pub fn has_role(roles: &[RoleWithPermissions], name: &str) -> bool {
    roles.iter().any(|r| r.role.name == name)
}

pub fn has_permission(roles: &[RoleWithPermissions], name: &str) -> bool {
    roles
        .iter()
        .any(|r| r.permissions.iter().any(|p| p.name == name))
}

pub fn has_any_role(roles: &[RoleWithPermissions], names: &[String]) -> bool {
    names.iter().any(|name| has_role(roles, name))
}

pub fn has_all_roles(roles: &[RoleWithPermissions], names: &[String]) -> bool {
    names.iter().all(|name| has_role(roles, name))
}

pub fn has_any_permission(roles: &[RoleWithPermissions], names: &[String]) -> bool {
    names.iter().any(|name| has_permission(roles, name))
}

pub fn has_all_permissions(roles: &[RoleWithPermissions], names: &[String]) -> bool {
    let held = effective_permissions(roles);
    names.iter().all(|name| held.contains(name))
}

fn parent_index(permissions: &[PermissionEntity]) -> HashMap<i64, Option<i64>> {
    permissions.iter().map(|p| (p.id, p.parent_id)).collect()
}

/// 沿父链向上查找 ancestor_id，遇到环或断链即停止
pub fn is_descendant_of(permissions: &[PermissionEntity], id: i64, ancestor_id: i64) -> bool {
    let parents = parent_index(permissions);
    let mut visited = HashSet::new();
    let mut current = parents.get(&id).copied().flatten();
    while let Some(parent) = current {
        if parent == ancestor_id {
            return true;
        }
        if !visited.insert(parent) {
            return false;
        }
        current = parents.get(&parent).copied().flatten();
    }
    false
}

/// 根节点深度为 0
pub fn depth(permissions: &[PermissionEntity], id: i64) -> usize {
    let parents = parent_index(permissions);
    let mut visited = HashSet::from([id]);
    let mut current = parents.get(&id).copied().flatten();
    let mut depth = 0;
    while let Some(parent) = current {
        if !visited.insert(parent) || !parents.contains_key(&parent) {
            break;
        }
        depth += 1;
        current = parents.get(&parent).copied().flatten();
    }
    depth
}

/// 把 id 的父级设为 new_parent 是否会形成环
pub fn creates_cycle(permissions: &[PermissionEntity], id: i64, new_parent: i64) -> bool {
    new_parent == id || is_descendant_of(permissions, new_parent, id)
}

/// 权限树节点
#[derive(Debug, Clone, Serialize)]
pub struct PermissionNode {
    #[serde(flatten)]
    pub permission: PermissionEntity,
    pub children: Vec<PermissionNode>,
}

/// 由扁平列表构建权限树，同级按 sort 排序
pub fn build_tree(permissions: &[PermissionEntity]) -> Vec<PermissionNode> {
    let mut children: HashMap<i64, Vec<&PermissionEntity>> = HashMap::new();
    let mut roots = Vec::new();
    for permission in permissions {
        match permission.parent_id {
            Some(parent) => children.entry(parent).or_default().push(permission),
            None => roots.push(permission),
        }
    }

    fn attach(
        permission: &PermissionEntity,
        children: &HashMap<i64, Vec<&PermissionEntity>>,
        visited: &mut HashSet<i64>,
    ) -> PermissionNode {
        visited.insert(permission.id);
        let mut kids: Vec<&PermissionEntity> = children
            .get(&permission.id)
            .map(|c| c.iter().copied().filter(|c| !visited.contains(&c.id)).collect())
            .unwrap_or_default();
        kids.sort_by_key(|p| (p.sort, p.id));
        PermissionNode {
            permission: permission.clone(),
            children: kids
                .into_iter()
                .map(|child| attach(child, children, visited))
                .collect(),
        }
    }

    roots.sort_by_key(|p| (p.sort, p.id));
    let mut visited = HashSet::new();
    roots
        .into_iter()
        .map(|root| attach(root, &children, &mut visited))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::fixtures::{permission, role};
    use super::*;

    #[test]
    fn shared_permissions_are_deduplicated() {
        let roles = vec![
            role(1, "editor", &["article:read", "article:write"]),
            role(2, "reviewer", &["article:read", "article:publish"]),
        ];
        let effective = effective_permissions(&roles);
        assert_eq!(effective.len(), 3);
        assert!(effective.contains("article:read"));
        assert!(has_permission(&roles, "article:publish"));
        assert!(!has_permission(&roles, "article:delete"));
    }

    #[test]
    fn role_membership() {
        let roles = vec![role(1, "editor", &[]), role(2, "reviewer", &[])];
        assert!(has_role(&roles, "editor"));
        assert!(!has_role(&roles, "admin"));
        assert!(has_any_role(&roles, &["admin".into(), "reviewer".into()]));
        assert!(!has_all_roles(&roles, &["admin".into(), "reviewer".into()]));
        assert!(has_all_roles(&roles, &["editor".into(), "reviewer".into()]));
    }

    #[test]
    fn parent_chain_is_not_used_for_access() {
        // 持有子权限不代表持有父权限
        let roles = vec![role(1, "viewer", &["system:user:list"])];
        assert!(!has_permission(&roles, "system:user"));
    }

    #[test]
    fn descendant_and_depth_walk_upwards() {
        let perms = vec![
            permission(1, "system", None, 0),
            permission(2, "system:user", Some(1), 0),
            permission(3, "system:user:list", Some(2), 0),
            permission(4, "report", None, 1),
        ];
        assert!(is_descendant_of(&perms, 3, 1));
        assert!(is_descendant_of(&perms, 3, 2));
        assert!(!is_descendant_of(&perms, 1, 3));
        assert!(!is_descendant_of(&perms, 4, 1));
        assert_eq!(depth(&perms, 1), 0);
        assert_eq!(depth(&perms, 3), 2);

        assert!(creates_cycle(&perms, 1, 1));
        assert!(creates_cycle(&perms, 1, 3));
        assert!(!creates_cycle(&perms, 3, 4));
    }

    #[test]
    fn walking_a_corrupt_cycle_terminates() {
        let perms = vec![
            permission(1, "a", Some(2), 0),
            permission(2, "b", Some(1), 0),
        ];
        assert!(is_descendant_of(&perms, 1, 2));
        assert!(!is_descendant_of(&perms, 1, 99));
        assert!(depth(&perms, 1) <= 2);
    }

    #[test]
    fn tree_sorts_siblings() {
        let perms = vec![
            permission(1, "system", None, 2),
            permission(2, "dashboard", None, 1),
            permission(3, "system:role", Some(1), 5),
            permission(4, "system:user", Some(1), 3),
        ];
        let tree = build_tree(&perms);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].permission.name, "dashboard");
        assert_eq!(tree[1].children[0].permission.name, "system:user");
        assert_eq!(tree[1].children[1].permission.name, "system:role");
    }
}
