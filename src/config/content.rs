//! Warmup content pools.
//!
//! Warmup messages are assembled by drawing one element from each of
//! several independent pools, so repeated sends vary naturally. The pools
//! are explicit configuration passed into the warmup controller, and can
//! be replaced wholesale by the operator.

use serde::{Deserialize, Serialize};

/// Pools for first-touch warmup messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupContentPools {
    /// Subject lines.
    pub subjects: Vec<String>,
    /// Opening greeting lines.
    pub greetings: Vec<String>,
    /// Body paragraphs.
    pub bodies: Vec<String>,
    /// Closing lines.
    pub closings: Vec<String>,
    /// Signature names.
    pub signatures: Vec<String>,
}

impl Default for WarmupContentPools {
    fn default() -> Self {
        Self {
            subjects: to_strings(&[
                "Quick update on our project",
                "Following up on our conversation",
                "Thoughts on the latest developments",
                "Checking in - how are things going?",
                "Quick question about our collaboration",
                "Updates from our team",
                "Interesting article you might enjoy",
                "Feedback on your recent work",
                "Just wanted to touch base",
                "Ideas for our next steps",
                "Great news to share",
                "Scheduling our next meeting",
                "Resources you might find helpful",
            ]),
            greetings: to_strings(&[
                "Hi there,",
                "Hello,",
                "Good morning,",
                "Good afternoon,",
                "Hey,",
                "Greetings,",
                "Hello there,",
            ]),
            bodies: to_strings(&[
                "I wanted to follow up on our previous conversation. How are things progressing on your end? We've made some significant progress here and I'd love to share updates with you soon.",
                "I came across an interesting article that I thought might be relevant to our discussion. It highlights some innovative approaches that could be beneficial for our project.",
                "I've been thinking about the challenges we discussed last time. I have a few ideas that might help address them effectively. Would you be available for a quick call to discuss?",
                "Just checking in to see how everything is going. Our team has been making steady progress, and we're on track to meet our deadlines. Let me know if you need any assistance from our end.",
                "I wanted to share some exciting news with you. We've recently achieved a significant milestone, and I believe it will positively impact our collaboration.",
                "I hope this email finds you well. I've been reviewing our project timeline and wanted to ensure we're aligned on the next steps. Could you provide a quick update on your progress?",
                "I've been reflecting on our last meeting and had some additional thoughts that might be worth exploring. I'd appreciate your perspective on these ideas.",
                "I wanted to touch base regarding our upcoming deadline. Is there anything you need from me to ensure we stay on track? I'm here to help if needed.",
                "I recently discovered a new tool that could streamline our workflow significantly. I'd be happy to demonstrate how it works if you're interested.",
                "I hope you're having a productive week. I wanted to follow up on the action items from our last discussion. Have you had a chance to review the materials I sent?",
            ]),
            closings: to_strings(&[
                "Best regards,",
                "Thanks,",
                "Cheers,",
                "All the best,",
                "Warm regards,",
                "Kind regards,",
                "Regards,",
                "Best wishes,",
            ]),
            signatures: to_strings(&[
                "John", "Sarah", "Michael", "Emily", "David", "Jennifer", "Robert", "Lisa",
                "William", "Jessica",
            ]),
        }
    }
}

/// Pools for replies within a warmup thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupReplyPools {
    /// Opening acknowledgement lines.
    pub intros: Vec<String>,
    /// Reply body sentences.
    pub bodies: Vec<String>,
    /// Follow-up questions that keep the thread going.
    pub questions: Vec<String>,
    /// Closing lines.
    pub closings: Vec<String>,
    /// Signature lines.
    pub signatures: Vec<String>,
}

impl Default for WarmupReplyPools {
    fn default() -> Self {
        Self {
            intros: to_strings(&[
                "Thanks for your email!",
                "Good to hear from you.",
                "Thanks for the update.",
                "I appreciate you reaching out.",
                "Thanks for sharing this information.",
                "Great to get your message.",
                "Thanks for following up.",
                "Thanks for the quick response.",
            ]),
            bodies: to_strings(&[
                "I completely agree with your points. Let's continue this discussion soon.",
                "That sounds like a great approach. I'll review the details and get back to you with any additional thoughts.",
                "I think you're on the right track. Let's schedule some time to discuss this further.",
                "Your suggestions make a lot of sense. I'll work on implementing them right away.",
                "I see what you mean. Let's explore these ideas in more depth when we next connect.",
                "This is very helpful information. I'll incorporate it into our planning.",
                "I think this is a solid plan. Let's move forward with it and see how it goes.",
                "You've given me a lot to think about. I'll consider these points carefully.",
            ]),
            questions: to_strings(&[
                "What do you think about moving forward with this next week?",
                "Do you have any other suggestions we should consider?",
                "Would it make sense to involve the team in this discussion?",
                "What timeline are you thinking for the next steps?",
                "Do you think we should prioritize this over our other initiatives?",
                "What resources do you think we'll need to make this happen?",
                "Is there anyone else we should loop into this conversation?",
                "How does this align with our overall objectives?",
            ]),
            closings: to_strings(&[
                "Looking forward to your thoughts.",
                "Let me know what you think.",
                "Let's touch base soon.",
                "Thanks again for your input.",
                "I value your feedback on this.",
                "Let's keep this conversation going.",
                "I appreciate your time and insights.",
            ]),
            signatures: to_strings(&[
                "Best regards,", "Thanks,", "Cheers,", "All the best,", "Warm regards,",
                "Kind regards,", "Regards,",
            ]),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pools_are_non_empty() {
        let pools = WarmupContentPools::default();
        assert!(!pools.subjects.is_empty());
        assert!(!pools.greetings.is_empty());
        assert!(!pools.bodies.is_empty());
        assert!(!pools.closings.is_empty());
        assert!(!pools.signatures.is_empty());
    }

    #[test]
    fn default_reply_pools_are_non_empty() {
        let pools = WarmupReplyPools::default();
        assert!(!pools.intros.is_empty());
        assert!(!pools.bodies.is_empty());
        assert!(!pools.questions.is_empty());
        assert!(!pools.closings.is_empty());
        assert!(!pools.signatures.is_empty());
    }

    #[test]
    fn subjects_carry_no_visible_marker() {
        // Correlation happens via a header, never the subject line.
        let pools = WarmupContentPools::default();
        for subject in &pools.subjects {
            assert!(!subject.to_lowercase().contains("warmup"));
        }
    }

    #[test]
    fn pools_roundtrip() {
        let pools = WarmupContentPools::default();
        let json = serde_json::to_string(&pools).unwrap();
        let back: WarmupContentPools = serde_json::from_str(&json).unwrap();
        assert_eq!(back.subjects.len(), pools.subjects.len());
    }
}
