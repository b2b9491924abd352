//! Canned community assistant. Rules are checked in order against the
//! lowercased message; the first rule with any matching keyword answers.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub topic: &'static str,
    pub text: &'static str,
}

struct Rule {
    keywords: &'static [&'static str],
    reply: Reply,
}

const RULES: &[Rule] = &[
    Rule {
        keywords: &["area", "good", "best"],
        reply: Reply {
            topic: "areas",
            text: "Top Areas: Indiranagar (fast resolution), Koramangala (active community), \
                   Jayanagar (well-maintained). Want a detailed comparison?",
        },
    },
    Rule {
        keywords: &["issue", "nearby", "problem"],
        reply: Reply {
            topic: "issues",
            text: "Recent issues: 1) Pothole on Market Rd (4 confirmed) \
                   2) Water shortage in Koramangala. Want details?",
        },
    },
    Rule {
        keywords: &["scam", "fraud", "safety"],
        reply: Reply {
            topic: "scams",
            text: "Recent scams: UPI fraud near ATMs (2 reports), fake delivery agents. \
                   Stay alert and report suspicious activity!",
        },
    },
    Rule {
        keywords: &["contact", "department", "office"],
        reply: Reply {
            topic: "contacts",
            text: "Key contacts: BBMP - 1913, Water Board - 1916, Traffic Police - 103, \
                   Electricity - 1912. Need specific department info?",
        },
    },
    Rule {
        keywords: &["report", "how to"],
        reply: Reply {
            topic: "reporting",
            text: "To report: 1) Take photos/videos 2) Describe location clearly \
                   3) Select correct category 4) Submit. Nearby users will verify!",
        },
    },
];

const FALLBACK: Reply = Reply {
    topic: "fallback",
    text: "I can help with area comparisons, nearby issues, scam alerts, department contacts, \
           and reporting guidance. What would you like to know?",
};

pub fn respond(message: &str) -> Reply {
    let lower = message.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.keywords.iter().any(|keyword| lower.contains(keyword)))
        .map(|rule| rule.reply)
        .unwrap_or(FALLBACK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_select_topics() {
        assert_eq!(respond("Which AREA is best to live in?").topic, "areas");
        assert_eq!(respond("any problems near me").topic, "issues");
        assert_eq!(respond("Is there a UPI fraud going on?").topic, "scams");
        assert_eq!(respond("water department number").topic, "contacts");
        assert_eq!(respond("How to file something").topic, "reporting");
    }

    #[test]
    fn earlier_rules_win() {
        // "issue" and "report" both match; the issues rule comes first.
        assert_eq!(respond("report an issue").topic, "issues");
    }

    #[test]
    fn unknown_questions_get_fallback() {
        let reply = respond("hello there");
        assert_eq!(reply, FALLBACK);
        assert!(reply.text.starts_with("I can help with area comparisons"));
    }

    #[test]
    fn texts_are_single_spaced() {
        for rule in RULES {
            assert!(!rule.reply.text.contains("  "), "{}", rule.reply.topic);
        }
        assert!(respond("contact").text.contains("Traffic Police - 103, Electricity"));
    }
}
