// Navigation capability sets
// Which navigation entries the shell may render in each authentication
// state. The session core only decides which set applies; rendering is the
// consumer's job.

/// One navigation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavItem {
    pub id: &'static str,
    pub title: &'static str,
    pub path: &'static str,
}

/// Entries available to anonymous visitors.
pub const BASE_NAVIGATION: &[NavItem] = &[
    NavItem {
        id: "home",
        title: "Home",
        path: "/",
    },
    NavItem {
        id: "products",
        title: "Products",
        path: "/products",
    },
    NavItem {
        id: "about",
        title: "About Us",
        path: "/about",
    },
    NavItem {
        id: "contact",
        title: "Contact",
        path: "/contact",
    },
];

/// Entries unlocked by an authenticated session.
pub const ELEVATED_NAVIGATION: &[NavItem] = &[
    NavItem {
        id: "dashboard",
        title: "Dashboard",
        path: "/dashboard",
    },
    NavItem {
        id: "orders",
        title: "Orders",
        path: "/orders",
    },
    NavItem {
        id: "cart",
        title: "Cart",
        path: "/cart",
    },
    NavItem {
        id: "profile",
        title: "Profile",
        path: "/profile",
    },
    NavItem {
        id: "settings",
        title: "Settings",
        path: "/settings",
    },
    NavItem {
        id: "logout",
        title: "Logout",
        path: "/logout",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_sets_are_distinct() {
        assert!(ELEVATED_NAVIGATION.iter().any(|item| item.id == "logout"));
        assert!(BASE_NAVIGATION.iter().all(|item| item.id != "logout"));
        assert_ne!(BASE_NAVIGATION, ELEVATED_NAVIGATION);
    }
}
